//! Dropbox drive provider.
//!
//! Talks to the Dropbox content API directly over `reqwest`. The physical
//! reference is the absolute drive path of the uploaded file.

use super::{ByteStream, ProviderError, ProviderResult, StorageStrategy, parse_config, prepare_payload};
use crate::crypto::Cipher;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize};
use std::io;

const PROVIDER: &str = "DROPBOX";

/// Dropbox content API base URL.
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com/2";

const API_ARG_HEADER: &str = "Dropbox-API-Arg";

#[derive(Debug, Deserialize)]
struct DropboxConfig {
    access_token: String,
    #[serde(default, rename = "path")]
    root_path: String,
    /// Override for the content API base, e.g. a proxy.
    #[serde(default)]
    content_url: Option<String>,
}

impl DropboxConfig {
    fn parse(config: &str) -> ProviderResult<Self> {
        let cfg: Self = parse_config(PROVIDER, config)?;
        if cfg.access_token.trim().is_empty() {
            return Err(ProviderError::config(PROVIDER, "access_token must not be empty"));
        }
        Ok(cfg)
    }

    fn content_url(&self) -> &str {
        self.content_url
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_URL)
            .trim_end_matches('/')
    }

    /// Absolute drive path for `filename` under the root path.
    fn full_path(&self, filename: &str) -> String {
        let root = self.root_path.trim_matches('/');
        let name = filename.trim_start_matches('/');
        if root.is_empty() {
            format!("/{name}")
        } else {
            format!("/{root}/{name}")
        }
    }
}

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'a str,
    autorename: bool,
    mute: bool,
}

#[derive(Serialize)]
struct DownloadArg<'a> {
    path: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    #[serde(default)]
    path_display: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DropboxStrategy {
    cipher: Cipher,
    http: Client,
}

impl DropboxStrategy {
    pub fn new(cipher: Cipher) -> Self {
        Self {
            cipher,
            http: Client::new(),
        }
    }

    fn api_arg<T: Serialize>(arg: &T) -> ProviderResult<String> {
        serde_json::to_string(arg).map_err(|err| ProviderError::backend(PROVIDER, err))
    }

    async fn check(response: Response, action: &str) -> ProviderResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::backend(
            PROVIDER,
            format!("{action} failed with HTTP {status}: {body}"),
        ))
    }
}

#[async_trait]
impl StorageStrategy for DropboxStrategy {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn validate_config(&self, config: &str) -> ProviderResult<()> {
        DropboxConfig::parse(config).map(|_| ())
    }

    async fn upload(
        &self,
        content: ByteStream,
        filename: &str,
        config: &str,
        encrypt: bool,
    ) -> ProviderResult<String> {
        let cfg = DropboxConfig::parse(config)?;
        let full_path = cfg.full_path(filename);

        let data = prepare_payload(PROVIDER, &self.cipher, content, encrypt).await?;

        let arg = Self::api_arg(&UploadArg {
            path: &full_path,
            mode: "overwrite",
            autorename: false,
            mute: true,
        })?;

        let response = self
            .http
            .post(format!("{}/files/upload", cfg.content_url()))
            .bearer_auth(&cfg.access_token)
            .header(API_ARG_HEADER, arg)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|err| ProviderError::backend(PROVIDER, err))?;
        let response = Self::check(response, "upload").await?;

        // Dropbox echoes the stored path; fall back to what we asked for.
        let stored = response
            .json::<UploadResult>()
            .await
            .ok()
            .and_then(|r| r.path_display)
            .unwrap_or(full_path);

        tracing::debug!(path = %stored, "dropbox object written");
        Ok(stored)
    }

    async fn download(&self, reference: &str, config: &str) -> ProviderResult<ByteStream> {
        let cfg = DropboxConfig::parse(config)?;
        let arg = Self::api_arg(&DownloadArg { path: reference })?;

        let response = self
            .http
            .post(format!("{}/files/download", cfg.content_url()))
            .bearer_auth(&cfg.access_token)
            .header(API_ARG_HEADER, arg)
            .send()
            .await
            .map_err(|err| ProviderError::backend(PROVIDER, err))?;
        let response = Self::check(response, "download").await?;

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(stream))
    }
}
