//! Defines routes for the tenant storage API and the admin API.
//!
//! ## Structure
//! - **Storage endpoints** (`X-API-Key` / `X-API-Secret`)
//!   - `POST /api/v1/storage/upload`: upload (`X-Bucket-Name`, `X-Original-Filename`)
//!   - `GET  /api/v1/storage/download/{id}`: download, decrypted when sealed
//!   - `GET  /api/v1/storage/metadata/{id}`: file metadata
//!
//! - **Admin endpoints** (`X-Admin-Token` when configured)
//!   - apps, buckets, replication rules and reconciliation tasks under
//!     `/api/v1/admin`

use crate::{
    handlers::{
        admin_handlers::{
            create_app, create_rule, delete_app, delete_rule, get_bucket, get_task,
            list_app_buckets, list_apps, list_buckets, list_rules, list_tasks, register_bucket,
            set_rule_active, update_app,
        },
        auth::{require_admin, require_app},
        health_handlers::{healthz, readyz},
        storage_handlers::{download_file, get_metadata, upload_file},
    },
    state::AppState,
};
use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

/// Build the full router. Every route shares one [`AppState`].
pub fn routes(state: AppState) -> Router {
    let storage = Router::new()
        .route("/upload", post(upload_file))
        .route("/download/{id}", get(download_file))
        .route("/metadata/{id}", get(get_metadata))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_app));

    let admin = Router::new()
        .route("/apps", get(list_apps).post(create_app))
        .route("/apps/{id}", put(update_app).delete(delete_app))
        .route("/buckets", get(list_buckets).post(register_bucket))
        .route("/buckets/{id}", get(get_bucket))
        .route("/buckets/app/{app_id}", get(list_app_buckets))
        .route("/replication", post(create_rule))
        .route("/replication/app/{app_id}", get(list_rules))
        .route("/replication/{id}", delete(delete_rule))
        .route("/replication/{id}/active", put(set_rule_active))
        .route("/replication/{id}/tasks", get(list_tasks))
        .route("/reconciliation/{task_id}", get(get_task))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/v1/storage", storage)
        .nest("/api/v1/admin", admin)
        .with_state(state)
}
