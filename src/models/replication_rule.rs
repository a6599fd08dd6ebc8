//! Represents a directed replication edge between two buckets of one app.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Writes to `source_bucket_id` fan out to `target_bucket_id` while active.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ReplicationRule {
    pub id: Uuid,

    /// App both buckets belong to.
    pub app_id: Uuid,

    pub source_bucket_id: Uuid,

    pub target_bucket_id: Uuid,

    pub active: bool,

    pub created_at: DateTime<Utc>,
}
