//! Request guards for the tenant and admin surfaces.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_SECRET_HEADER: &str = "x-api-secret";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Authenticated app, inserted as a request extension by [`require_app`].
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub Uuid);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn secrets_match(given: &str, stored: &str) -> bool {
    given.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Resolve `X-API-Key`/`X-API-Secret` to an active app.
pub async fn require_app(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (Some(key), Some(secret)) = (
        header(req.headers(), API_KEY_HEADER),
        header(req.headers(), API_SECRET_HEADER),
    ) else {
        return Err(AppError::unauthorized("missing API credentials"));
    };

    let app = state
        .store()
        .find_app_by_key(key)
        .await
        .map_err(|err| {
            tracing::error!("credential lookup failed: {}", err);
            AppError::internal("metadata store error")
        })?
        .filter(|app| secrets_match(secret, &app.api_secret))
        .ok_or_else(|| AppError::unauthorized("invalid API credentials"))?;

    if !app.is_active {
        tracing::warn!(app_id = %app.id, "request from inactive app refused");
        return Err(AppError::unauthorized("app is inactive"));
    }

    req.extensions_mut().insert(Tenant(app.id));
    Ok(next.run(req).await)
}

/// Check `X-Admin-Token` when an admin token is configured.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.admin_token.as_deref() {
        let given = header(req.headers(), ADMIN_TOKEN_HEADER).unwrap_or_default();
        if !secrets_match(given, expected) {
            return Err(AppError::unauthorized("invalid admin token"));
        }
    }
    Ok(next.run(req).await)
}
