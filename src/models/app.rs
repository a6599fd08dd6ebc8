//! Represents a tenant application holding an API key/secret pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::bucket::BucketWithUsage;

/// A client application allowed to talk to the storage API.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct App {
    /// Unique identifier for this app.
    pub id: Uuid,

    /// Human-readable, unique app name.
    pub app_name: String,

    /// Public half of the credential pair (`X-API-Key`).
    pub api_key: String,

    /// Private half of the credential pair (`X-API-Secret`).
    pub api_secret: String,

    /// Inactive apps are refused by the auth middleware.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

/// App listing entry with the buckets it owns.
#[derive(Serialize, Debug)]
pub struct AppWithBuckets {
    #[serde(flatten)]
    pub app: App,
    pub buckets: Vec<BucketWithUsage>,
}
