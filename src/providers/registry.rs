//! Provider registry.
//!
//! Built once at startup and shared behind an `Arc`; there is no way to
//! register a provider after construction, so lookups never race with
//! registration.

use super::{
    StorageStrategy, dropbox::DropboxStrategy, local::LocalStrategy, s3::S3Strategy,
};
use crate::crypto::Cipher;
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;

/// Tags of the providers shipped with the gateway.
pub const LOCAL: &str = "LOCAL";
pub const S3: &str = "S3";
pub const DROPBOX: &str = "DROPBOX";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported provider type `{0}`")]
pub struct UnsupportedProvider(pub String);

#[derive(Clone)]
pub struct ProviderRegistry {
    strategies: HashMap<String, Arc<dyn StorageStrategy>>,
}

impl ProviderRegistry {
    /// Registry holding the local, S3 and Dropbox strategies, all sharing
    /// `cipher`.
    pub fn with_defaults(cipher: Cipher) -> Self {
        Self::from_strategies([
            Arc::new(LocalStrategy::new(cipher.clone())) as Arc<dyn StorageStrategy>,
            Arc::new(S3Strategy::new(cipher.clone())),
            Arc::new(DropboxStrategy::new(cipher)),
        ])
    }

    /// Build a registry keyed by each strategy's own tag. A later strategy
    /// with the same tag replaces an earlier one.
    pub fn from_strategies<I>(strategies: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn StorageStrategy>>,
    {
        let strategies = strategies
            .into_iter()
            .map(|s| (normalize(s.name()), s))
            .collect();
        Self { strategies }
    }

    /// Resolve a provider tag. Unknown tags are an error, never a fallback.
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn StorageStrategy>, UnsupportedProvider> {
        self.strategies
            .get(&normalize(tag))
            .cloned()
            .ok_or_else(|| UnsupportedProvider(tag.to_string()))
    }

    /// Registered tags, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.strategies.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

fn normalize(tag: &str) -> String {
    tag.trim().to_ascii_uppercase()
}
