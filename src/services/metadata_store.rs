//! src/services/metadata_store.rs
//!
//! MetadataStore: durable records of apps, buckets, file metadata,
//! replication rules and reconciliation tasks, kept in SQLite. Every method
//! is one read or one write (or one short transaction); nothing here holds
//! a connection across provider I/O.

use crate::models::{
    app::App,
    bucket::{Bucket, BucketWithUsage},
    file_metadata::FileMetadata,
    reconciliation::{ReconciliationOutcome, ReconciliationTask, TaskStatus},
    replication_rule::ReplicationRule,
};
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{collections::HashSet, str::FromStr, sync::Arc};
use uuid::Uuid;

const APP_COLUMNS: &str = "id, app_name, api_key, api_secret, is_active, created_at";
const BUCKET_COLUMNS: &str =
    "id, app_id, name, provider_type, config, is_default, cipher, created_at";
const FILE_COLUMNS: &str = "id, app_id, bucket_id, original_name, physical_path, file_size, \
                            content_type, checksum, created_at";
const RULE_COLUMNS: &str =
    "id, app_id, source_bucket_id, target_bucket_id, active, created_at";
const TASK_COLUMNS: &str = "id, rule_id, status, copied, skipped, failed, last_error, \
                            created_at, started_at, finished_at";

#[derive(Clone, Debug)]
pub struct MetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if needed) the database at `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// A private in-memory database with the schema applied. A single
    /// connection, since every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let store = Self::connect("sqlite::memory:", 1).await?;
        store.migrate().await.map_err(sqlx::Error::from)?;
        Ok(store)
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        sqlx::migrate!("./migrations").run(&*self.db).await
    }

    // --- apps ---

    pub async fn create_app(&self, app: &App) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO apps (id, app_name, api_key, api_secret, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(app.id)
        .bind(&app.app_name)
        .bind(&app.api_key)
        .bind(&app.api_secret)
        .bind(app.is_active)
        .bind(app.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn list_apps(&self) -> Result<Vec<App>, sqlx::Error> {
        sqlx::query_as::<_, App>(&format!(
            "SELECT {APP_COLUMNS} FROM apps ORDER BY created_at, app_name"
        ))
        .fetch_all(&*self.db)
        .await
    }

    pub async fn get_app(&self, id: Uuid) -> Result<Option<App>, sqlx::Error> {
        sqlx::query_as::<_, App>(&format!("SELECT {APP_COLUMNS} FROM apps WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    pub async fn find_app_by_key(&self, api_key: &str) -> Result<Option<App>, sqlx::Error> {
        sqlx::query_as::<_, App>(&format!("SELECT {APP_COLUMNS} FROM apps WHERE api_key = ?"))
            .bind(api_key)
            .fetch_optional(&*self.db)
            .await
    }

    pub async fn update_app(&self, app: &App) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE apps SET app_name = ?, is_active = ? WHERE id = ?")
            .bind(&app.app_name)
            .bind(app.is_active)
            .bind(app.id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete an app together with its rules, file records and buckets.
    pub async fn delete_app(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM replication_rules WHERE app_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM file_metadata WHERE app_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM buckets WHERE app_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM apps WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // --- buckets ---

    pub async fn create_bucket(&self, bucket: &Bucket) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO buckets (id, app_id, name, provider_type, config, is_default, cipher, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(bucket.app_id)
        .bind(&bucket.name)
        .bind(&bucket.provider_type)
        .bind(&bucket.config)
        .bind(bucket.is_default)
        .bind(bucket.cipher)
        .bind(bucket.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get_bucket(&self, id: Uuid) -> Result<Option<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(&format!("SELECT {BUCKET_COLUMNS} FROM buckets WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    /// Look a bucket up by name inside one app's namespace.
    pub async fn find_bucket(&self, app_id: Uuid, name: &str) -> Result<Option<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE app_id = ? AND name = ?"
        ))
        .bind(app_id)
        .bind(name)
        .fetch_optional(&*self.db)
        .await
    }

    /// Buckets with their stored byte totals, for one app or for all apps.
    pub async fn list_buckets(&self, app_id: Option<Uuid>) -> Result<Vec<BucketWithUsage>, sqlx::Error> {
        sqlx::query_as::<_, BucketWithUsage>(
            "SELECT b.id, b.app_id, b.name, b.provider_type, b.config, b.is_default, b.cipher,
                    b.created_at,
                    COALESCE((SELECT SUM(f.file_size) FROM file_metadata f
                              WHERE f.bucket_id = b.id), 0) AS total_size
             FROM buckets b
             WHERE ? IS NULL OR b.app_id = ?
             ORDER BY b.created_at, b.name",
        )
        .bind(app_id)
        .bind(app_id)
        .fetch_all(&*self.db)
        .await
    }

    // --- file metadata ---

    pub async fn insert_file(&self, meta: &FileMetadata) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO file_metadata (
                id, app_id, bucket_id, original_name, physical_path, file_size,
                content_type, checksum, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(meta.id)
        .bind(meta.app_id)
        .bind(meta.bucket_id)
        .bind(&meta.original_name)
        .bind(&meta.physical_path)
        .bind(meta.file_size)
        .bind(&meta.content_type)
        .bind(&meta.checksum)
        .bind(meta.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Fetch a file record visible to `app_id`. Records of other apps are
    /// indistinguishable from missing ones.
    pub async fn get_file(&self, id: Uuid, app_id: Uuid) -> Result<Option<FileMetadata>, sqlx::Error> {
        sqlx::query_as::<_, FileMetadata>(&format!(
            "SELECT {FILE_COLUMNS} FROM file_metadata WHERE id = ? AND app_id = ?"
        ))
        .bind(id)
        .bind(app_id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn list_files(&self, bucket_id: Uuid) -> Result<Vec<FileMetadata>, sqlx::Error> {
        sqlx::query_as::<_, FileMetadata>(&format!(
            "SELECT {FILE_COLUMNS} FROM file_metadata WHERE bucket_id = ? ORDER BY created_at, id"
        ))
        .bind(bucket_id)
        .fetch_all(&*self.db)
        .await
    }

    /// Distinct original names recorded under a bucket.
    pub async fn file_names(&self, bucket_id: Uuid) -> Result<HashSet<String>, sqlx::Error> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT original_name FROM file_metadata WHERE bucket_id = ?",
        )
        .bind(bucket_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(names.into_iter().collect())
    }

    pub async fn has_file_named(&self, bucket_id: Uuid, name: &str) -> Result<bool, sqlx::Error> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM file_metadata WHERE bucket_id = ? AND original_name = ? LIMIT 1",
        )
        .bind(bucket_id)
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(found.is_some())
    }

    // --- replication rules ---

    pub async fn create_rule(&self, rule: &ReplicationRule) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO replication_rules (id, app_id, source_bucket_id, target_bucket_id, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(rule.id)
        .bind(rule.app_id)
        .bind(rule.source_bucket_id)
        .bind(rule.target_bucket_id)
        .bind(rule.active)
        .bind(rule.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Option<ReplicationRule>, sqlx::Error> {
        sqlx::query_as::<_, ReplicationRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM replication_rules WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn list_rules(&self, app_id: Uuid) -> Result<Vec<ReplicationRule>, sqlx::Error> {
        sqlx::query_as::<_, ReplicationRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM replication_rules WHERE app_id = ? ORDER BY created_at"
        ))
        .bind(app_id)
        .fetch_all(&*self.db)
        .await
    }

    /// Active rules whose source is `bucket_id`.
    pub async fn active_rules_for_source(
        &self,
        bucket_id: Uuid,
    ) -> Result<Vec<ReplicationRule>, sqlx::Error> {
        sqlx::query_as::<_, ReplicationRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM replication_rules
             WHERE source_bucket_id = ? AND active = 1 ORDER BY created_at"
        ))
        .bind(bucket_id)
        .fetch_all(&*self.db)
        .await
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM replication_rules WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set a rule's active flag, returning the flag it had before, or `None`
    /// if the rule does not exist.
    pub async fn set_rule_active(&self, id: Uuid, active: bool) -> Result<Option<bool>, sqlx::Error> {
        let mut tx = self.db.begin().await?;
        let previous: Option<bool> =
            sqlx::query_scalar("SELECT active FROM replication_rules WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if previous.is_some() {
            sqlx::query("UPDATE replication_rules SET active = ? WHERE id = ?")
                .bind(active)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(previous)
    }

    // --- reconciliation tasks ---

    pub async fn create_task(&self, rule_id: Uuid) -> Result<ReconciliationTask, sqlx::Error> {
        sqlx::query_as::<_, ReconciliationTask>(&format!(
            "INSERT INTO reconciliation_tasks (id, rule_id, status, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(rule_id)
        .bind(TaskStatus::Pending)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    pub async fn mark_task_running(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE reconciliation_tasks SET status = ?, started_at = ? WHERE id = ?")
            .bind(TaskStatus::Running)
            .bind(Utc::now())
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        outcome: &ReconciliationOutcome,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE reconciliation_tasks
             SET status = ?, copied = ?, skipped = ?, failed = ?, last_error = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(outcome.copied)
        .bind(outcome.skipped)
        .bind(outcome.failed)
        .bind(outcome.last_error.as_deref())
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<ReconciliationTask>, sqlx::Error> {
        sqlx::query_as::<_, ReconciliationTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM reconciliation_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    pub async fn list_tasks(&self, rule_id: Uuid) -> Result<Vec<ReconciliationTask>, sqlx::Error> {
        sqlx::query_as::<_, ReconciliationTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM reconciliation_tasks WHERE rule_id = ? ORDER BY created_at"
        ))
        .bind(rule_id)
        .fetch_all(&*self.db)
        .await
    }

    /// Tasks created before `before` that never recorded an outcome.
    pub async fn list_unfinished_tasks(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ReconciliationTask>, sqlx::Error> {
        sqlx::query_as::<_, ReconciliationTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM reconciliation_tasks
             WHERE finished_at IS NULL AND created_at < ?
             ORDER BY created_at"
        ))
        .bind(before)
        .fetch_all(&*self.db)
        .await
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str) -> App {
        App {
            id: Uuid::new_v4(),
            app_name: name.into(),
            api_key: format!("{name}-key"),
            api_secret: format!("{name}-secret"),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn bucket(app_id: Uuid, name: &str) -> Bucket {
        Bucket {
            id: Uuid::new_v4(),
            app_id,
            name: name.into(),
            provider_type: "LOCAL".into(),
            config: r#"{"basePath":"/tmp/x"}"#.into(),
            is_default: false,
            cipher: false,
            created_at: Utc::now(),
        }
    }

    fn file(app_id: Uuid, bucket_id: Uuid, name: &str, size: i64) -> FileMetadata {
        let id = Uuid::new_v4();
        FileMetadata {
            id,
            app_id,
            bucket_id,
            original_name: name.into(),
            physical_path: format!("/tmp/x/{id}.bin"),
            file_size: size,
            content_type: "application/octet-stream".into(),
            checksum: String::new(),
            created_at: Utc::now(),
            is_ciphered: false,
        }
    }

    #[tokio::test]
    async fn test_bucket_usage_totals() {
        let store = MetadataStore::in_memory().await.unwrap();
        let a = app("alpha");
        store.create_app(&a).await.unwrap();
        let b = bucket(a.id, "docs");
        store.create_bucket(&b).await.unwrap();
        store.insert_file(&file(a.id, b.id, "x.txt", 10)).await.unwrap();
        store.insert_file(&file(a.id, b.id, "y.txt", 32)).await.unwrap();

        let listed = store.list_buckets(Some(a.id)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].total_size, 42);
        assert_eq!(store.list_buckets(None).await.unwrap().len(), 1);
        assert!(store.list_buckets(Some(Uuid::new_v4())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_bucket_name_in_app_is_unique_violation() {
        let store = MetadataStore::in_memory().await.unwrap();
        let a = app("alpha");
        store.create_app(&a).await.unwrap();
        store.create_bucket(&bucket(a.id, "docs")).await.unwrap();
        let err = store.create_bucket(&bucket(a.id, "docs")).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_get_file_is_scoped_to_app() {
        let store = MetadataStore::in_memory().await.unwrap();
        let a = app("alpha");
        let b = app("beta");
        store.create_app(&a).await.unwrap();
        store.create_app(&b).await.unwrap();
        let bucket_a = bucket(a.id, "docs");
        store.create_bucket(&bucket_a).await.unwrap();
        let f = file(a.id, bucket_a.id, "x.txt", 1);
        store.insert_file(&f).await.unwrap();

        assert!(store.get_file(f.id, a.id).await.unwrap().is_some());
        assert!(store.get_file(f.id, b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_rule_active_reports_previous() {
        let store = MetadataStore::in_memory().await.unwrap();
        let a = app("alpha");
        store.create_app(&a).await.unwrap();
        let src = bucket(a.id, "src");
        let dst = bucket(a.id, "dst");
        store.create_bucket(&src).await.unwrap();
        store.create_bucket(&dst).await.unwrap();
        let rule = ReplicationRule {
            id: Uuid::new_v4(),
            app_id: a.id,
            source_bucket_id: src.id,
            target_bucket_id: dst.id,
            active: false,
            created_at: Utc::now(),
        };
        store.create_rule(&rule).await.unwrap();

        assert!(store.active_rules_for_source(src.id).await.unwrap().is_empty());
        assert_eq!(store.set_rule_active(rule.id, true).await.unwrap(), Some(false));
        assert_eq!(store.set_rule_active(rule.id, true).await.unwrap(), Some(true));
        assert_eq!(store.active_rules_for_source(src.id).await.unwrap().len(), 1);
        assert_eq!(store.set_rule_active(Uuid::new_v4(), true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_app_cascades() {
        let store = MetadataStore::in_memory().await.unwrap();
        let a = app("alpha");
        store.create_app(&a).await.unwrap();
        let b = bucket(a.id, "docs");
        store.create_bucket(&b).await.unwrap();
        store.insert_file(&file(a.id, b.id, "x.txt", 5)).await.unwrap();

        assert!(store.delete_app(a.id).await.unwrap());
        assert!(store.get_bucket(b.id).await.unwrap().is_none());
        assert!(store.list_files(b.id).await.unwrap().is_empty());
        assert!(!store.delete_app(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let store = MetadataStore::in_memory().await.unwrap();
        let rule_id = Uuid::new_v4();
        let task = store.create_task(rule_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        store.mark_task_running(task.id).await.unwrap();
        let outcome = ReconciliationOutcome {
            copied: 2,
            skipped: 1,
            failed: 0,
            last_error: None,
        };
        store
            .finish_task(task.id, outcome.status(), &outcome)
            .await
            .unwrap();

        let done = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!((done.copied, done.skipped, done.failed), (2, 1, 0));
        assert!(done.started_at.is_some() && done.finished_at.is_some());
        assert_eq!(store.list_tasks(rule_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unfinished_tasks_only_before_cutoff() {
        let store = MetadataStore::in_memory().await.unwrap();
        let rule_id = Uuid::new_v4();
        let pending = store.create_task(rule_id).await.unwrap();
        let running = store.create_task(rule_id).await.unwrap();
        store.mark_task_running(running.id).await.unwrap();
        let done = store.create_task(rule_id).await.unwrap();
        store
            .finish_task(done.id, TaskStatus::Succeeded, &ReconciliationOutcome::default())
            .await
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let ids: Vec<Uuid> = store
            .list_unfinished_tasks(cutoff)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&pending.id) && ids.contains(&running.id));

        let earlier = Utc::now() - chrono::Duration::hours(1);
        assert!(store.list_unfinished_tasks(earlier).await.unwrap().is_empty());
    }
}
