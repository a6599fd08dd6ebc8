use crate::{
    crypto::CryptoError,
    providers::ProviderError,
    services::GatewayError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(_) => AppError::not_found(err.to_string()),
            GatewayError::InvalidInput(_) | GatewayError::UnsupportedProvider(_) => {
                AppError::bad_request(err.to_string())
            }
            GatewayError::Conflict(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            // provider and crypto messages never carry credentials or key bytes
            GatewayError::Provider(ProviderError::Crypto { source, .. })
            | GatewayError::Crypto(source) => crypto_failure(&source),
            GatewayError::Provider(err) => {
                tracing::error!("provider failure: {}", err);
                AppError::internal(format!("storage provider `{}` failed", err.provider()))
            }
            GatewayError::Sqlx(err) => {
                tracing::error!("database error: {}", err);
                AppError::internal("metadata store error")
            }
            GatewayError::Io(err) => {
                tracing::error!("i/o error: {}", err);
                AppError::internal("i/o error")
            }
        }
    }
}

fn crypto_failure(err: &CryptoError) -> AppError {
    match err {
        CryptoError::Integrity | CryptoError::Malformed(_) => {
            AppError::internal("stored object failed integrity check")
        }
        other if other.is_config() => AppError::internal("encryption is not configured"),
        _ => AppError::internal("encryption failed"),
    }
}
