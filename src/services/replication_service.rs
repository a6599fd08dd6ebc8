//! Replication engine.
//!
//! Two paths keep target buckets in step with a source bucket:
//! - fan-out: every upload to a source is written once more to the target of
//!   each active rule, independently of the others;
//! - reconciliation: when a rule is switched on, files already in the source
//!   are copied to the target unless a file with the same original name is
//!   already recorded there.
//!
//! Reconciliation runs on a [`ReconciliationQueue`] so the request that
//! flipped the rule returns immediately, and each run leaves a queryable
//! task record behind.

use super::{
    GatewayError, GatewayResult,
    metadata_store::MetadataStore,
    object_io::{ObjectIo, PendingUpload},
};
use crate::{
    audit::{AuditAction, AuditEvent, AuditSink, Severity},
    models::{
        bucket::Bucket,
        file_metadata::FileMetadata,
        reconciliation::{ReconciliationOutcome, ReconciliationTask, TaskStatus},
        replication_rule::ReplicationRule,
    },
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const INTERRUPTED: &str = "interrupted by restart";

/// What one upload produced across the primary bucket and its replicas.
#[derive(Debug, Clone)]
pub struct FanOutResult {
    pub primary: FileMetadata,
    pub replicas: Vec<FileMetadata>,
    /// Replica writes that failed and were skipped.
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReplicationService {
    pub io: ObjectIo,
    pub audit: Arc<dyn AuditSink>,
}

impl ReplicationService {
    pub fn new(io: ObjectIo, audit: Arc<dyn AuditSink>) -> Self {
        Self { io, audit }
    }

    fn store(&self) -> &MetadataStore {
        &self.io.store
    }

    /// Write `upload` to `source`, then to the target of every active rule
    /// whose source it is.
    ///
    /// Only the primary write can fail the call; replica failures are logged,
    /// audited and counted.
    pub async fn fan_out(&self, source: &Bucket, upload: &PendingUpload) -> GatewayResult<FanOutResult> {
        let primary = self.io.write(source, upload).await?;

        let rules = match self.store().active_rules_for_source(source.id).await {
            Ok(rules) => rules,
            Err(err) => {
                self.replica_failed(
                    source,
                    None,
                    &upload.original_name,
                    &format!("could not load replication rules: {err}"),
                );
                return Ok(FanOutResult {
                    primary,
                    replicas: Vec::new(),
                    failed: 0,
                });
            }
        };

        let results = join_all(rules.iter().map(|rule| self.replicate(rule, upload))).await;

        let mut replicas = Vec::with_capacity(results.len());
        let mut failed = 0;
        for (rule, result) in rules.iter().zip(results) {
            match result {
                Ok(meta) => replicas.push(meta),
                Err(err) => {
                    failed += 1;
                    self.replica_failed(
                        source,
                        Some(rule.target_bucket_id),
                        &upload.original_name,
                        &err.to_string(),
                    );
                }
            }
        }

        debug!(
            bucket = %source.name,
            replicas = replicas.len(),
            failed,
            "fan-out complete"
        );
        Ok(FanOutResult {
            primary,
            replicas,
            failed,
        })
    }

    async fn replicate(&self, rule: &ReplicationRule, upload: &PendingUpload) -> GatewayResult<FileMetadata> {
        let target = self.rule_bucket(rule, rule.target_bucket_id).await?;
        self.io.write(&target, upload).await
    }

    /// Load one end of a rule, refusing buckets of another app.
    async fn rule_bucket(&self, rule: &ReplicationRule, bucket_id: Uuid) -> GatewayResult<Bucket> {
        self.store()
            .get_bucket(bucket_id)
            .await?
            .filter(|b| b.app_id == rule.app_id)
            .ok_or_else(|| GatewayError::not_found(format!("bucket {bucket_id}")))
    }

    fn replica_failed(&self, source: &Bucket, target: Option<Uuid>, name: &str, reason: &str) {
        let target = target.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
        warn!(
            source = %source.name,
            target_bucket = %target,
            file = name,
            "replica upload failed: {}",
            reason
        );
        self.audit.emit(AuditEvent::new(
            AuditAction::ReplicaUploadFailed,
            format!(
                "Replica of {name} from bucket {} to {target} failed: {reason}",
                source.id
            ),
            Severity::Error,
        ));
    }

    /// Run one reconciliation task to completion and record its outcome.
    pub async fn run_reconciliation(&self, task: &ReconciliationTask) -> ReconciliationTask {
        if let Err(err) = self.store().mark_task_running(task.id).await {
            warn!(task = %task.id, "could not mark task running: {}", err);
        }

        let (status, outcome) = match self.reconcile_rule(task.rule_id).await {
            Ok(outcome) => (outcome.status(), outcome),
            Err(err) => {
                let outcome = ReconciliationOutcome {
                    last_error: Some(err.to_string()),
                    ..Default::default()
                };
                (TaskStatus::Failed, outcome)
            }
        };

        if let Err(err) = self.store().finish_task(task.id, status, &outcome).await {
            error!(task = %task.id, "could not record task outcome: {}", err);
        }

        let severity = match status {
            TaskStatus::Succeeded => Severity::Info,
            TaskStatus::Partial => Severity::Warn,
            _ => Severity::Error,
        };
        info!(
            task = %task.id,
            rule = %task.rule_id,
            %status,
            copied = outcome.copied,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "reconciliation finished"
        );
        self.audit.emit(AuditEvent::new(
            AuditAction::ReconciliationFinished,
            format!(
                "Reconciliation {} for rule {}: {status} (copied {}, skipped {}, failed {})",
                task.id, task.rule_id, outcome.copied, outcome.skipped, outcome.failed
            ),
            severity,
        ));

        match self.store().get_task(task.id).await {
            Ok(Some(stored)) => stored,
            _ => ReconciliationTask {
                status,
                copied: outcome.copied,
                skipped: outcome.skipped,
                failed: outcome.failed,
                last_error: outcome.last_error,
                ..task.clone()
            },
        }
    }

    /// Copy every source file whose original name is absent from the target.
    async fn reconcile_rule(&self, rule_id: Uuid) -> GatewayResult<ReconciliationOutcome> {
        let rule = self
            .store()
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("replication rule {rule_id}")))?;

        let mut outcome = ReconciliationOutcome::default();
        if !rule.active {
            info!(rule = %rule.id, "rule deactivated before reconciliation ran; nothing to do");
            return Ok(outcome);
        }

        let source = self.rule_bucket(&rule, rule.source_bucket_id).await?;
        let target = self.rule_bucket(&rule, rule.target_bucket_id).await?;
        let files = self.store().list_files(source.id).await?;

        for meta in files {
            // re-read the target each time; a concurrent run may have copied it
            match self.store().has_file_named(target.id, &meta.original_name).await {
                Ok(true) => {
                    outcome.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    outcome.failed += 1;
                    outcome.last_error = Some(err.to_string());
                    warn!(rule = %rule.id, file = %meta.original_name, "target lookup failed: {}", err);
                    continue;
                }
            }

            match self.copy_file(&source, &target, &meta).await {
                Ok(copy) => {
                    outcome.copied += 1;
                    debug!(from = %meta.id, to = %copy.id, file = %meta.original_name, "reconciled");
                }
                Err(err) => {
                    outcome.failed += 1;
                    outcome.last_error = Some(err.to_string());
                    self.replica_failed(&source, Some(target.id), &meta.original_name, &err.to_string());
                }
            }
        }

        Ok(outcome)
    }

    async fn copy_file(&self, source: &Bucket, target: &Bucket, meta: &FileMetadata) -> GatewayResult<FileMetadata> {
        let payload = self.io.read(source, meta).await?;
        let upload = PendingUpload {
            app_id: meta.app_id,
            original_name: meta.original_name.clone(),
            content_type: meta.content_type.clone(),
            checksum: meta.checksum.clone(),
            payload,
        };
        self.io.write(target, &upload).await
    }
}

/// Bounded pool that runs reconciliation tasks off the request path.
#[derive(Clone)]
pub struct ReconciliationQueue {
    tx: mpsc::UnboundedSender<ReconciliationTask>,
    store: MetadataStore,
}

impl ReconciliationQueue {
    /// Spawn the dispatcher. At most `workers` tasks run at once.
    ///
    /// Tasks left unfinished by a previous process are recovered in the
    /// background: `pending` ones are queued again, `running` ones are
    /// marked failed.
    pub fn start(engine: ReplicationService, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = engine.io.store.clone();
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        tokio::spawn(dispatch(engine, rx, permits));

        let queue = Self { tx, store };
        let started_at = Utc::now();
        let recovering = queue.clone();
        tokio::spawn(async move {
            if let Err(err) = recovering.recover(started_at).await {
                error!("could not recover reconciliation tasks: {}", err);
            }
        });
        queue
    }

    /// Settle tasks created before `before` that never finished. Returns how
    /// many were queued again.
    pub async fn recover(&self, before: DateTime<Utc>) -> GatewayResult<usize> {
        let mut requeued = 0;
        for task in self.store.list_unfinished_tasks(before).await? {
            match task.status {
                status if status.is_terminal() => {}
                TaskStatus::Running => {
                    let outcome = ReconciliationOutcome {
                        last_error: Some(INTERRUPTED.into()),
                        ..Default::default()
                    };
                    self.store
                        .finish_task(task.id, TaskStatus::Failed, &outcome)
                        .await?;
                    warn!(task = %task.id, rule = %task.rule_id, "reconciliation interrupted by restart");
                }
                _ => {
                    if self.tx.send(task.clone()).is_err() {
                        break;
                    }
                    requeued += 1;
                    info!(task = %task.id, rule = %task.rule_id, "reconciliation requeued");
                }
            }
        }
        Ok(requeued)
    }

    /// Record a pending task for `rule_id` and queue it.
    pub async fn enqueue(&self, rule_id: Uuid) -> GatewayResult<ReconciliationTask> {
        let task = self.store.create_task(rule_id).await?;

        if self.tx.send(task.clone()).is_err() {
            let outcome = ReconciliationOutcome {
                last_error: Some("reconciliation queue is closed".into()),
                ..Default::default()
            };
            self.store
                .finish_task(task.id, TaskStatus::Failed, &outcome)
                .await?;
            error!(task = %task.id, rule = %rule_id, "reconciliation queue is closed");
        } else {
            info!(task = %task.id, rule = %rule_id, "reconciliation queued");
        }
        Ok(task)
    }
}

async fn dispatch(
    engine: ReplicationService,
    mut rx: mpsc::UnboundedReceiver<ReconciliationTask>,
    permits: Arc<Semaphore>,
) {
    while let Some(task) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let engine = engine.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let task_id = task.id;
            let worker = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.run_reconciliation(&task).await })
            };

            // a panicking run must not leave the task stuck in `running`
            if let Err(err) = worker.await {
                error!(task = %task_id, "reconciliation worker crashed: {}", err);
                let outcome = ReconciliationOutcome {
                    last_error: Some(format!("worker crashed: {err}")),
                    ..Default::default()
                };
                if let Err(err) = engine
                    .io
                    .store
                    .finish_task(task_id, TaskStatus::Failed, &outcome)
                    .await
                {
                    error!(task = %task_id, "could not record crashed task: {}", err);
                }
            }
        });
    }
    debug!("reconciliation dispatcher stopped");
}
