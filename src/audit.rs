//! Audit events emitted by the gateway.
//!
//! Delivery is fire-and-forget: `emit` never blocks on the sink and never
//! reports failure back to the operation that produced the event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Service name stamped on every event.
pub const SERVICE_NAME: &str = "storage-gateway";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

/// Kinds of events the gateway reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    FileUpload,
    FileDownload,
    DecryptionFailed,
    ReplicaUploadFailed,
    ReconciliationFinished,
    AdminAppCreate,
    AdminAppUpdate,
    AdminAppDelete,
    AdminBucketRegister,
    AdminRuleCreate,
    AdminRuleToggle,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileUpload => "FILE_UPLOAD",
            Self::FileDownload => "FILE_DOWNLOAD",
            Self::DecryptionFailed => "DECRYPTION_FAILED",
            Self::ReplicaUploadFailed => "REPLICA_UPLOAD_FAILED",
            Self::ReconciliationFinished => "RECONCILIATION_FINISHED",
            Self::AdminAppCreate => "ADMIN_APP_CREATE",
            Self::AdminAppUpdate => "ADMIN_APP_UPDATE",
            Self::AdminAppDelete => "ADMIN_APP_DELETE",
            Self::AdminBucketRegister => "ADMIN_BUCKET_REGISTER",
            Self::AdminRuleCreate => "ADMIN_RULE_CREATE",
            Self::AdminRuleToggle => "ADMIN_RULE_TOGGLE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub service: &'static str,
    pub action: AuditAction,
    pub details: String,
    pub severity: Severity,
}

impl AuditEvent {
    pub fn new(action: AuditAction, details: impl Into<String>, severity: Severity) -> Self {
        Self {
            timestamp: Utc::now(),
            service: SERVICE_NAME,
            action,
            details: details.into(),
            severity,
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes audit events as structured `tracing` records on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let action = event.action.as_str();
        let timestamp = event.timestamp.to_rfc3339();
        match event.severity {
            Severity::Info => tracing::info!(
                target: "audit",
                service = event.service,
                action,
                %timestamp,
                "{}",
                event.details
            ),
            Severity::Warn => tracing::warn!(
                target: "audit",
                service = event.service,
                action,
                %timestamp,
                "{}",
                event.details
            ),
            Severity::Error => tracing::error!(
                target: "audit",
                service = event.service,
                action,
                %timestamp,
                "{}",
                event.details
            ),
        }
    }
}

/// Collects events in memory. Used by tests to assert on what was reported.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.events().iter().filter(|e| e.action == action).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}
