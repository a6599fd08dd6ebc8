//! S3-compatible object storage provider.
//!
//! Uses `rust-s3`. The physical reference is the object key, including the
//! configured root folder and without a leading slash.

use super::{
    ByteStream, ProviderError, ProviderResult, StorageStrategy, bytes_stream, parse_config,
    prepare_payload,
};
use crate::crypto::Cipher;
use async_trait::async_trait;
use bytes::Bytes;
use s3::{Bucket, creds::Credentials, region::Region};
use serde::Deserialize;

const PROVIDER: &str = "S3";

#[derive(Debug, Deserialize)]
struct S3Config {
    bucket_name: String,
    region: String,
    #[serde(default)]
    access_key: Option<String>,
    #[serde(default)]
    secret_key: Option<String>,
    /// Root folder inside the bucket.
    #[serde(default, rename = "path")]
    root_folder: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    path_style: bool,
}

impl S3Config {
    fn parse(config: &str) -> ProviderResult<Self> {
        let cfg: Self = parse_config(PROVIDER, config)?;
        if cfg.bucket_name.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "bucket_name must not be empty"));
        }
        if cfg.region.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "region must not be empty"));
        }
        if cfg.static_credentials().is_none()
            && (non_empty(&cfg.access_key).is_some() || non_empty(&cfg.secret_key).is_some())
        {
            return Err(ProviderError::config(
                PROVIDER,
                "access_key and secret_key must be given together",
            ));
        }
        Ok(cfg)
    }

    fn static_credentials(&self) -> Option<(&str, &str)> {
        non_empty(&self.access_key).zip(non_empty(&self.secret_key))
    }

    fn root(&self) -> &str {
        self.root_folder.as_deref().unwrap_or("").trim_matches('/')
    }

    /// Key for a freshly uploaded object.
    fn object_key(&self, filename: &str) -> String {
        let name = filename.trim_start_matches('/');
        match self.root() {
            "" => name.to_string(),
            root => format!("{root}/{name}"),
        }
    }

    /// Key for a stored reference; references written without the root
    /// folder are resolved under it.
    fn reference_key(&self, reference: &str) -> String {
        let reference = reference.trim_start_matches('/');
        let root = self.root();
        if root.is_empty() || reference.starts_with(root) {
            reference.to_string()
        } else {
            format!("{root}/{reference}")
        }
    }

    fn bucket(&self) -> ProviderResult<Box<Bucket>> {
        let region = match non_empty(&self.endpoint) {
            Some(endpoint) => Region::Custom {
                region: self.region.clone(),
                endpoint: endpoint.to_string(),
            },
            None => self
                .region
                .parse::<Region>()
                .map_err(|err| ProviderError::config(PROVIDER, err.to_string()))?,
        };

        let credentials = match self.static_credentials() {
            Some((access, secret)) => Credentials::new(Some(access), Some(secret), None, None, None),
            None => Credentials::default(),
        }
        .map_err(|err| ProviderError::backend(PROVIDER, err))?;

        let bucket = Bucket::new(&self.bucket_name, region, credentials)
            .map_err(|err| ProviderError::backend(PROVIDER, err))?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn ensure_success(status: u16, action: &str, key: &str) -> ProviderResult<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ProviderError::backend(
            PROVIDER,
            format!("{action} `{key}` returned HTTP {status}"),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct S3Strategy {
    cipher: Cipher,
}

impl S3Strategy {
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }
}

#[async_trait]
impl StorageStrategy for S3Strategy {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn validate_config(&self, config: &str) -> ProviderResult<()> {
        S3Config::parse(config).map(|_| ())
    }

    async fn upload(
        &self,
        content: ByteStream,
        filename: &str,
        config: &str,
        encrypt: bool,
    ) -> ProviderResult<String> {
        let cfg = S3Config::parse(config)?;
        let bucket = cfg.bucket()?;
        let key = cfg.object_key(filename);

        let data = prepare_payload(PROVIDER, &self.cipher, content, encrypt).await?;

        let response = bucket
            .put_object(&key, &data)
            .await
            .map_err(|err| ProviderError::backend(PROVIDER, err))?;
        ensure_success(response.status_code(), "put", &key)?;

        tracing::debug!(bucket = %cfg.bucket_name, %key, bytes = data.len(), "s3 object written");
        Ok(key)
    }

    async fn download(&self, reference: &str, config: &str) -> ProviderResult<ByteStream> {
        let cfg = S3Config::parse(config)?;
        let bucket = cfg.bucket()?;
        let key = cfg.reference_key(reference);

        let response = bucket
            .get_object(&key)
            .await
            .map_err(|err| ProviderError::backend(PROVIDER, err))?;
        ensure_success(response.status_code(), "get", &key)?;

        Ok(bytes_stream(Bytes::copy_from_slice(response.bytes())))
    }
}
