//! Gateway services: metadata persistence, the upload/download
//! orchestrator, the replication engine and the admin surface.

pub mod admin_service;
pub mod metadata_store;
pub mod object_io;
pub mod replication_service;
pub mod storage_service;

use crate::{
    crypto::CryptoError,
    providers::{ProviderError, registry::UnsupportedProvider},
};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    UnsupportedProvider(#[from] UnsupportedProvider),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
