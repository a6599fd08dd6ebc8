//! Administrative operations: app credentials, bucket registration and
//! replication rules.

use super::{
    GatewayError, GatewayResult,
    metadata_store::{MetadataStore, is_unique_violation},
    replication_service::ReconciliationQueue,
};
use crate::{
    audit::{AuditAction, AuditEvent, AuditSink, Severity},
    models::{
        app::{App, AppWithBuckets},
        bucket::{Bucket, BucketWithUsage},
        reconciliation::ReconciliationTask,
        replication_rule::ReplicationRule,
    },
    providers::{ProviderError, ProviderRegistry},
};
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

const API_KEY_BYTES: usize = 16;
const API_SECRET_BYTES: usize = 32;
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Deserialize)]
pub struct NewBucket {
    pub app_id: Uuid,
    pub name: String,
    pub provider_type: String,
    /// Provider config, either a JSON object or a JSON string holding one.
    pub config: serde_json::Value,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub cipher: bool,
}

#[derive(Debug, Deserialize)]
pub struct NewRule {
    pub app_id: Uuid,
    pub source_bucket_id: Uuid,
    pub target_bucket_id: Uuid,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
pub struct AppUpdate {
    pub app_name: Option<String>,
    pub is_active: Option<bool>,
}

/// Result of toggling a rule.
#[derive(Debug, serde::Serialize)]
pub struct RuleToggle {
    pub rule: ReplicationRule,
    /// Reconciliation queued by an inactive → active transition.
    pub reconciliation: Option<ReconciliationTask>,
}

#[derive(Clone)]
pub struct AdminService {
    pub store: MetadataStore,
    pub registry: Arc<ProviderRegistry>,
    pub audit: Arc<dyn AuditSink>,
    pub reconciler: ReconciliationQueue,
}

impl AdminService {
    pub fn new(
        store: MetadataStore,
        registry: Arc<ProviderRegistry>,
        audit: Arc<dyn AuditSink>,
        reconciler: ReconciliationQueue,
    ) -> Self {
        Self {
            store,
            registry,
            audit,
            reconciler,
        }
    }

    fn record(&self, action: AuditAction, details: String) {
        self.audit.emit(AuditEvent::new(action, details, Severity::Info));
    }

    // --- apps ---

    pub async fn create_app(&self, app_name: &str) -> GatewayResult<App> {
        let app_name = ensure_name("app_name", app_name)?;
        let app = App {
            id: Uuid::new_v4(),
            app_name: app_name.to_string(),
            api_key: generate_token(API_KEY_BYTES),
            api_secret: generate_token(API_SECRET_BYTES),
            is_active: true,
            created_at: Utc::now(),
        };

        self.store
            .create_app(&app)
            .await
            .map_err(|err| conflict_or(err, format!("app `{app_name}` already exists")))?;

        self.record(
            AuditAction::AdminAppCreate,
            format!("New App created: {} (ID: {})", app.app_name, app.id),
        );
        Ok(app)
    }

    /// Every app with its buckets and their stored totals.
    pub async fn list_apps(&self) -> GatewayResult<Vec<AppWithBuckets>> {
        let apps = self.store.list_apps().await?;
        let mut buckets: HashMap<Uuid, Vec<BucketWithUsage>> = HashMap::new();
        for bucket in self.store.list_buckets(None).await? {
            buckets.entry(bucket.bucket.app_id).or_default().push(bucket);
        }

        Ok(apps
            .into_iter()
            .map(|app| AppWithBuckets {
                buckets: buckets.remove(&app.id).unwrap_or_default(),
                app,
            })
            .collect())
    }

    pub async fn update_app(&self, id: Uuid, update: AppUpdate) -> GatewayResult<App> {
        let mut app = self
            .store
            .get_app(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("app {id}")))?;

        if let Some(name) = update.app_name.as_deref() {
            app.app_name = ensure_name("app_name", name)?.to_string();
        }
        if let Some(active) = update.is_active {
            app.is_active = active;
        }

        self.store
            .update_app(&app)
            .await
            .map_err(|err| conflict_or(err, format!("app `{}` already exists", app.app_name)))?;

        self.record(
            AuditAction::AdminAppUpdate,
            format!("App updated: {} (ID: {})", app.app_name, app.id),
        );
        Ok(app)
    }

    /// Delete an app. Its buckets, rules and file records go with it.
    pub async fn delete_app(&self, id: Uuid) -> GatewayResult<()> {
        if !self.store.delete_app(id).await? {
            return Err(GatewayError::not_found(format!("app {id}")));
        }
        self.record(AuditAction::AdminAppDelete, format!("App deleted ID: {id}"));
        Ok(())
    }

    // --- buckets ---

    pub async fn register_bucket(&self, req: NewBucket) -> GatewayResult<Bucket> {
        let name = ensure_name("name", &req.name)?.to_string();

        if self.store.get_app(req.app_id).await?.is_none() {
            return Err(GatewayError::not_found(format!("app {}", req.app_id)));
        }

        let strategy = self.registry.resolve(&req.provider_type)?;
        let config = match req.config {
            serde_json::Value::String(raw) => raw,
            other => other.to_string(),
        };
        strategy.validate_config(&config).map_err(|err| match err {
            ProviderError::Config { .. } => GatewayError::InvalidInput(err.to_string()),
            other => GatewayError::Provider(other),
        })?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            app_id: req.app_id,
            name,
            provider_type: strategy.name().to_string(),
            config,
            is_default: req.is_default,
            cipher: req.cipher,
            created_at: Utc::now(),
        };

        self.store
            .create_bucket(&bucket)
            .await
            .map_err(|err| conflict_or(err, format!("bucket `{}` already exists for this app", bucket.name)))?;

        self.record(
            AuditAction::AdminBucketRegister,
            format!("Bucket {} registered for App {}", bucket.name, bucket.app_id),
        );
        Ok(bucket)
    }

    pub async fn list_buckets(&self, app_id: Option<Uuid>) -> GatewayResult<Vec<BucketWithUsage>> {
        Ok(self.store.list_buckets(app_id).await?)
    }

    pub async fn get_bucket(&self, id: Uuid) -> GatewayResult<Bucket> {
        self.store
            .get_bucket(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("bucket {id}")))
    }

    // --- replication ---

    /// Create a rule between two buckets of the same app. An active rule is
    /// reconciled right away.
    pub async fn create_rule(&self, req: NewRule) -> GatewayResult<RuleToggle> {
        if req.source_bucket_id == req.target_bucket_id {
            return Err(GatewayError::InvalidInput(
                "source and target bucket must differ".into(),
            ));
        }

        for bucket_id in [req.source_bucket_id, req.target_bucket_id] {
            let bucket = self.get_bucket(bucket_id).await?;
            if bucket.app_id != req.app_id {
                return Err(GatewayError::InvalidInput(format!(
                    "bucket {bucket_id} does not belong to app {}",
                    req.app_id
                )));
            }
        }

        let rule = ReplicationRule {
            id: Uuid::new_v4(),
            app_id: req.app_id,
            source_bucket_id: req.source_bucket_id,
            target_bucket_id: req.target_bucket_id,
            active: req.active,
            created_at: Utc::now(),
        };
        self.store
            .create_rule(&rule)
            .await
            .map_err(|err| conflict_or(err, "a rule for this source and target already exists".into()))?;

        self.record(
            AuditAction::AdminRuleCreate,
            format!(
                "Replication rule {} created: {} -> {} (active: {})",
                rule.id, rule.source_bucket_id, rule.target_bucket_id, rule.active
            ),
        );

        let reconciliation = if rule.active {
            Some(self.reconciler.enqueue(rule.id).await?)
        } else {
            None
        };
        Ok(RuleToggle {
            rule,
            reconciliation,
        })
    }

    pub async fn list_rules(&self, app_id: Uuid) -> GatewayResult<Vec<ReplicationRule>> {
        Ok(self.store.list_rules(app_id).await?)
    }

    pub async fn delete_rule(&self, id: Uuid) -> GatewayResult<()> {
        if !self.store.delete_rule(id).await? {
            return Err(GatewayError::not_found(format!("replication rule {id}")));
        }
        Ok(())
    }

    /// Set a rule's active flag. Only an inactive → active transition
    /// queues reconciliation; the call returns without waiting for it.
    pub async fn set_rule_active(&self, id: Uuid, active: bool) -> GatewayResult<RuleToggle> {
        let previous = self
            .store
            .set_rule_active(id, active)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("replication rule {id}")))?;

        let rule = self
            .store
            .get_rule(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("replication rule {id}")))?;

        self.record(
            AuditAction::AdminRuleToggle,
            format!("Replication rule {id} active: {previous} -> {active}"),
        );

        let reconciliation = if !previous && active {
            Some(self.reconciler.enqueue(id).await?)
        } else {
            None
        };
        Ok(RuleToggle {
            rule,
            reconciliation,
        })
    }

    pub async fn list_tasks(&self, rule_id: Uuid) -> GatewayResult<Vec<ReconciliationTask>> {
        Ok(self.store.list_tasks(rule_id).await?)
    }

    pub async fn get_task(&self, id: Uuid) -> GatewayResult<ReconciliationTask> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("reconciliation task {id}")))
    }
}

fn ensure_name<'a>(field: &str, value: &'a str) -> GatewayResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidInput(format!("{field} is required")));
    }
    if trimmed.len() > MAX_NAME_LEN || trimmed.chars().any(|c| c.is_control()) {
        return Err(GatewayError::InvalidInput(format!("{field} is not acceptable")));
    }
    Ok(trimmed)
}

fn conflict_or(err: sqlx::Error, message: String) -> GatewayError {
    if is_unique_violation(&err) {
        GatewayError::Conflict(message)
    } else {
        GatewayError::Sqlx(err)
    }
}

/// Hex-encoded random token of `n` bytes.
pub fn generate_token(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
