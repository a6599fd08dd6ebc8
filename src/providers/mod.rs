//! Storage provider strategies.
//!
//! Every backend implements [`StorageStrategy`]: a whole-object upload that
//! returns a physical reference, and a download that hands back the raw
//! stored bytes as a stream. Ciphering on upload is requested by the caller
//! through `encrypt`; decryption is never done here, because the bucket's
//! cipher flag (not the backend) decides whether stored bytes are sealed.

pub mod dropbox;
pub mod local;
pub mod registry;
pub mod s3;

use crate::crypto::{Cipher, CryptoError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};
use serde::de::DeserializeOwned;
use std::{io, pin::Pin};
use thiserror::Error;

pub use registry::ProviderRegistry;

/// Byte stream used for both directions of a transfer.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The bucket's config document is missing fields or malformed.
    #[error("{provider} config invalid: {reason}")]
    Config {
        provider: &'static str,
        reason: String,
    },
    /// The backend itself failed (network, permission, not found).
    #[error("{provider} backend error: {source}")]
    Backend {
        provider: &'static str,
        #[source]
        source: BoxError,
    },
    /// Sealing the payload failed before it left the gateway.
    #[error("{provider} could not encrypt payload: {source}")]
    Crypto {
        provider: &'static str,
        #[source]
        source: CryptoError,
    },
}

impl ProviderError {
    pub fn config(provider: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            provider,
            reason: reason.into(),
        }
    }

    pub fn backend(provider: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            provider,
            source: source.into(),
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            Self::Config { provider, .. }
            | Self::Backend { provider, .. }
            | Self::Crypto { provider, .. } => provider,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[async_trait]
pub trait StorageStrategy: Send + Sync {
    /// Provider tag, e.g. `LOCAL`.
    fn name(&self) -> &'static str;

    /// Check that `config` parses into this provider's schema.
    fn validate_config(&self, config: &str) -> ProviderResult<()>;

    /// Store the whole of `content` under `filename` in the location described
    /// by `config`, sealing it first when `encrypt` is set.
    ///
    /// Returns the backend reference needed to read the object back.
    async fn upload(
        &self,
        content: ByteStream,
        filename: &str,
        config: &str,
        encrypt: bool,
    ) -> ProviderResult<String>;

    /// Open the object at `reference` for reading. Bytes come back exactly as
    /// stored.
    async fn download(&self, reference: &str, config: &str) -> ProviderResult<ByteStream>;
}

/// Wrap an in-memory payload as a single-chunk stream.
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(stream::once(async move { Ok(data) }))
}

/// Drain a stream into one contiguous buffer.
pub async fn collect_stream(mut content: ByteStream) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = content.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Parse a bucket config document into a provider's schema.
pub(crate) fn parse_config<T: DeserializeOwned>(
    provider: &'static str,
    config: &str,
) -> ProviderResult<T> {
    serde_json::from_str(config).map_err(|err| ProviderError::config(provider, err.to_string()))
}

/// Buffer the full upload body and seal it when requested.
pub(crate) async fn prepare_payload(
    provider: &'static str,
    cipher: &Cipher,
    content: ByteStream,
    encrypt: bool,
) -> ProviderResult<Bytes> {
    let data = collect_stream(content)
        .await
        .map_err(|err| ProviderError::backend(provider, err))?;

    if !encrypt {
        return Ok(data);
    }

    let sealed = cipher
        .encrypt(&data)
        .map_err(|source| ProviderError::Crypto { provider, source })?;
    tracing::debug!(provider, plain = data.len(), sealed = sealed.len(), "payload sealed");
    Ok(Bytes::from(sealed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_collect_stream_joins_chunks() {
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"")),
            Ok(Bytes::from_static(b"cd")),
        ];
        let joined = collect_stream(Box::pin(stream::iter(chunks))).await.unwrap();
        assert_eq!(&joined[..], b"abcd");
    }

    #[tokio::test]
    async fn test_prepare_payload_without_key_is_crypto_error() {
        let err = prepare_payload("LOCAL", &Cipher::disabled(), bytes_stream("x"), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Crypto {
                source: CryptoError::MissingKey,
                ..
            }
        ));
    }
}
