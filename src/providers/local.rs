//! Local filesystem provider.
//!
//! Objects land directly in the configured base directory; the physical
//! reference is the full path of the written file.

use super::{ByteStream, ProviderError, ProviderResult, StorageStrategy, parse_config, prepare_payload};
use crate::crypto::Cipher;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const PROVIDER: &str = "LOCAL";

#[derive(Debug, Deserialize)]
struct LocalConfig {
    #[serde(alias = "basePath")]
    base_path: String,
}

impl LocalConfig {
    fn parse(config: &str) -> ProviderResult<Self> {
        let cfg: Self = parse_config(PROVIDER, config)?;
        if cfg.base_path.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "basePath must not be empty"));
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone)]
pub struct LocalStrategy {
    cipher: Cipher,
}

impl LocalStrategy {
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }

    /// Physical filenames are always generated; anything that could escape
    /// the base directory is refused.
    fn ensure_plain_filename(filename: &str) -> ProviderResult<()> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(ProviderError::backend(
                PROVIDER,
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("refusing non-plain filename `{filename}`"),
                ),
            )),
        }
    }

    /// Resolve a stored reference and make sure it stays under `base`.
    ///
    /// Both sides are normalised lexically first, so a base such as
    /// `../objects` still matches the references it produced.
    fn resolve_reference(base: &Path, reference: &str) -> ProviderResult<PathBuf> {
        let base = normalize(base);
        let candidate = normalize(Path::new(reference));
        let path = if candidate.is_absolute() || candidate.starts_with(&base) {
            candidate
        } else {
            normalize(&base.join(candidate))
        };

        if path == base || !path.starts_with(&base) {
            return Err(ProviderError::backend(
                PROVIDER,
                io::Error::new(
                    ErrorKind::PermissionDenied,
                    "reference lies outside the bucket base path",
                ),
            ));
        }
        Ok(path)
    }
}

/// Fold `.` and `..` without touching the filesystem. Leading `..` of a
/// relative path are kept; `..` at the root is dropped.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl StorageStrategy for LocalStrategy {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn validate_config(&self, config: &str) -> ProviderResult<()> {
        LocalConfig::parse(config).map(|_| ())
    }

    async fn upload(
        &self,
        content: ByteStream,
        filename: &str,
        config: &str,
        encrypt: bool,
    ) -> ProviderResult<String> {
        let cfg = LocalConfig::parse(config)?;
        Self::ensure_plain_filename(filename)?;

        let base = PathBuf::from(&cfg.base_path);
        fs::create_dir_all(&base)
            .await
            .map_err(|err| ProviderError::backend(PROVIDER, err))?;

        let data = prepare_payload(PROVIDER, &self.cipher, content, encrypt).await?;

        let full_path = base.join(filename);
        let tmp_path = base.join(format!(".tmp-{}", Uuid::new_v4()));
        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &full_path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ProviderError::backend(PROVIDER, err));
        }

        tracing::debug!(path = %full_path.display(), bytes = data.len(), "local object written");
        Ok(full_path.to_string_lossy().into_owned())
    }

    async fn download(&self, reference: &str, config: &str) -> ProviderResult<ByteStream> {
        let cfg = LocalConfig::parse(config)?;
        let path = Self::resolve_reference(Path::new(&cfg.base_path), reference)?;

        let file = File::open(&path)
            .await
            .map_err(|err| ProviderError::backend(PROVIDER, err))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }
}
