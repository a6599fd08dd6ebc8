//! Represents one physical object written to one bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a stored file. Never mutated after insert.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileMetadata {
    /// Unique identifier; also the stem of the physical filename.
    pub id: Uuid,

    /// Owning app.
    pub app_id: Uuid,

    /// Bucket the object was written to.
    pub bucket_id: Uuid,

    /// Name supplied by the uploader. Never used for on-disk naming.
    pub original_name: String,

    /// Backend reference returned by the provider.
    pub physical_path: String,

    /// Size of the plaintext in bytes.
    pub file_size: i64,

    pub content_type: String,

    /// MD5 hex digest of the plaintext.
    pub checksum: String,

    pub created_at: DateTime<Utc>,

    /// Mirrors the owning bucket's cipher flag at read time.
    #[sqlx(skip)]
    #[serde(default)]
    pub is_ciphered: bool,
}
