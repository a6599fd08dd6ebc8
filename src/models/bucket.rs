//! Represents a provider-backed storage location owned by one app.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A named storage location.
///
/// `config` is an opaque JSON document whose schema depends on
/// `provider_type`; it is validated by the provider before the bucket is
/// stored.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket.
    pub id: Uuid,

    /// Owning app.
    pub app_id: Uuid,

    /// Name, unique within the owning app.
    pub name: String,

    /// Provider tag, e.g. `LOCAL`, `S3`, `DROPBOX`.
    pub provider_type: String,

    /// Provider configuration document. Carries credentials, so it is never
    /// serialized back out.
    #[serde(skip_serializing)]
    pub config: String,

    pub is_default: bool,

    /// Payloads written here are sealed before they leave the gateway.
    pub cipher: bool,

    pub created_at: DateTime<Utc>,
}

/// Bucket plus the total size of every file recorded under it.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct BucketWithUsage {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub bucket: Bucket,
    pub total_size: i64,
}
