//! Admin handlers for apps, buckets and replication rules.

use crate::{
    errors::AppError,
    models::{
        app::{App, AppWithBuckets},
        bucket::{Bucket, BucketWithUsage},
        reconciliation::ReconciliationTask,
        replication_rule::ReplicationRule,
    },
    services::admin_service::{AdminService, AppUpdate, NewBucket, NewRule, RuleToggle},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateAppReq {
    pub app_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveReq {
    pub active: bool,
}

// --- apps ---

pub async fn create_app(
    State(admin): State<AdminService>,
    Json(req): Json<CreateAppReq>,
) -> Result<impl IntoResponse, AppError> {
    let app = admin.create_app(&req.app_name).await?;
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn list_apps(State(admin): State<AdminService>) -> Result<Json<Vec<AppWithBuckets>>, AppError> {
    Ok(Json(admin.list_apps().await?))
}

pub async fn update_app(
    State(admin): State<AdminService>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppUpdate>,
) -> Result<Json<App>, AppError> {
    Ok(Json(admin.update_app(id, req).await?))
}

pub async fn delete_app(
    State(admin): State<AdminService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    admin.delete_app(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- buckets ---

pub async fn register_bucket(
    State(admin): State<AdminService>,
    Json(req): Json<NewBucket>,
) -> Result<impl IntoResponse, AppError> {
    let bucket = admin.register_bucket(req).await?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

pub async fn list_buckets(State(admin): State<AdminService>) -> Result<Json<Vec<BucketWithUsage>>, AppError> {
    Ok(Json(admin.list_buckets(None).await?))
}

pub async fn list_app_buckets(
    State(admin): State<AdminService>,
    Path(app_id): Path<Uuid>,
) -> Result<Json<Vec<BucketWithUsage>>, AppError> {
    Ok(Json(admin.list_buckets(Some(app_id)).await?))
}

pub async fn get_bucket(
    State(admin): State<AdminService>,
    Path(id): Path<Uuid>,
) -> Result<Json<Bucket>, AppError> {
    Ok(Json(admin.get_bucket(id).await?))
}

// --- replication ---

pub async fn create_rule(
    State(admin): State<AdminService>,
    Json(req): Json<NewRule>,
) -> Result<impl IntoResponse, AppError> {
    let created = admin.create_rule(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_rules(
    State(admin): State<AdminService>,
    Path(app_id): Path<Uuid>,
) -> Result<Json<Vec<ReplicationRule>>, AppError> {
    Ok(Json(admin.list_rules(app_id).await?))
}

pub async fn delete_rule(
    State(admin): State<AdminService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    admin.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/v1/admin/replication/{id}/active`. Answers 202 when the call
/// queued a reconciliation.
pub async fn set_rule_active(
    State(admin): State<AdminService>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetActiveReq>,
) -> Result<impl IntoResponse, AppError> {
    let toggled: RuleToggle = admin.set_rule_active(id, req.active).await?;
    let status = if toggled.reconciliation.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(toggled)))
}

pub async fn list_tasks(
    State(admin): State<AdminService>,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Vec<ReconciliationTask>>, AppError> {
    Ok(Json(admin.list_tasks(rule_id).await?))
}

pub async fn get_task(
    State(admin): State<AdminService>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<ReconciliationTask>, AppError> {
    Ok(Json(admin.get_task(task_id).await?))
}
