//! Shared application state and its wiring.

use crate::{
    audit::AuditSink,
    crypto::Cipher,
    providers::ProviderRegistry,
    services::{
        admin_service::AdminService,
        metadata_store::MetadataStore,
        object_io::ObjectIo,
        replication_service::{ReconciliationQueue, ReplicationService},
        storage_service::StorageService,
    },
};
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub admin: AdminService,
    /// When set, admin routes require a matching `X-Admin-Token`.
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    /// Wire services over one store and registry, starting the
    /// reconciliation pool. Must be called inside a tokio runtime.
    pub fn build(
        store: MetadataStore,
        registry: Arc<ProviderRegistry>,
        cipher: Cipher,
        audit: Arc<dyn AuditSink>,
        reconcile_workers: usize,
        admin_token: Option<String>,
    ) -> Self {
        let io = ObjectIo::new(store.clone(), registry.clone(), cipher);
        let storage = StorageService::new(io.clone(), audit.clone());
        let queue = ReconciliationQueue::start(
            ReplicationService::new(io, audit.clone()),
            reconcile_workers,
        );
        let admin = AdminService::new(store, registry, audit, queue);

        Self {
            storage,
            admin,
            admin_token: admin_token.map(Arc::from),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        self.storage.store()
    }
}

impl FromRef<AppState> for StorageService {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for AdminService {
    fn from_ref(state: &AppState) -> Self {
        state.admin.clone()
    }
}
