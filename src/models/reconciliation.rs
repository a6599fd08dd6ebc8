//! Represents one catch-up copy run for a replication rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    /// Every missing file was copied.
    Succeeded,
    /// Some files copied, some failed.
    Partial,
    /// Nothing could be copied, or the task could not start.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Partial | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        })
    }
}

/// Queryable status of a reconciliation run.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ReconciliationTask {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub status: TaskStatus,
    /// Files copied to the target.
    pub copied: i64,
    /// Files already present in the target by name.
    pub skipped: i64,
    /// Files whose copy failed.
    pub failed: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counters accumulated while a task runs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    pub copied: i64,
    pub skipped: i64,
    pub failed: i64,
    pub last_error: Option<String>,
}

impl ReconciliationOutcome {
    pub fn status(&self) -> TaskStatus {
        match (self.copied, self.failed) {
            (_, 0) => TaskStatus::Succeeded,
            (0, _) => TaskStatus::Failed,
            _ => TaskStatus::Partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_status() {
        let mut outcome = ReconciliationOutcome::default();
        assert_eq!(outcome.status(), TaskStatus::Succeeded);

        outcome.skipped = 3;
        assert_eq!(outcome.status(), TaskStatus::Succeeded);

        outcome.failed = 1;
        assert_eq!(outcome.status(), TaskStatus::Failed);

        outcome.copied = 2;
        assert_eq!(outcome.status(), TaskStatus::Partial);
        assert!(outcome.status().is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
