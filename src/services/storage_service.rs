//! src/services/storage_service.rs
//!
//! StorageService: the upload/download orchestrator. An upload is buffered,
//! named after a fresh id, and handed to the replication engine, which writes
//! the primary copy and one copy per active rule. A download is always
//! scoped to the calling app, goes through the owning bucket's provider, and
//! is opened transparently when the bucket is ciphered.

use super::{
    GatewayError, GatewayResult,
    metadata_store::MetadataStore,
    object_io::{ObjectIo, PendingUpload},
    replication_service::{FanOutResult, ReplicationService},
};
use crate::{
    audit::{AuditAction, AuditEvent, AuditSink, Severity},
    crypto::CryptoError,
    models::{bucket::Bucket, file_metadata::FileMetadata},
    providers::{ByteStream, ProviderError, collect_stream},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

const MAX_ORIGINAL_NAME_LEN: usize = 1024;

/// An object opened for download.
pub struct Download {
    pub meta: FileMetadata,
    pub body: ByteStream,
}

#[derive(Clone)]
pub struct StorageService {
    pub io: ObjectIo,
    pub replication: ReplicationService,
    pub audit: Arc<dyn AuditSink>,
}

impl StorageService {
    pub fn new(io: ObjectIo, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            replication: ReplicationService::new(io.clone(), audit.clone()),
            io,
            audit,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.io.store
    }

    /// Basic validation of the caller-supplied name. It is only ever stored
    /// as metadata, but it must be printable and bounded.
    fn ensure_original_name(name: &str) -> GatewayResult<()> {
        if name.trim().is_empty() {
            return Err(GatewayError::InvalidInput("original filename is required".into()));
        }
        if name.len() > MAX_ORIGINAL_NAME_LEN || name.chars().any(|c| c.is_control()) {
            return Err(GatewayError::InvalidInput("original filename is not acceptable".into()));
        }
        Ok(())
    }

    /// Upload a file into `bucket_name` of `app_id`, replicating it to every
    /// active target.
    pub async fn upload_file(
        &self,
        app_id: Uuid,
        bucket_name: &str,
        original_name: &str,
        body: ByteStream,
    ) -> GatewayResult<FanOutResult> {
        Self::ensure_original_name(original_name)?;

        let bucket = self
            .store()
            .find_bucket(app_id, bucket_name)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("bucket `{bucket_name}`")))?;

        let payload = collect_stream(body)
            .await
            .map_err(|err| GatewayError::InvalidInput(format!("could not read request body: {err}")))?;
        let upload = PendingUpload::new(app_id, original_name, payload);

        let result = self.replication.fan_out(&bucket, &upload).await.map_err(|err| {
            error!(bucket = %bucket.name, file = original_name, "upload failed: {}", err);
            err
        })?;

        info!(
            bucket = %bucket.name,
            file_id = %result.primary.id,
            size = result.primary.file_size,
            replicas = result.replicas.len(),
            "file stored"
        );
        self.audit.emit(AuditEvent::new(
            AuditAction::FileUpload,
            format!(
                "File {} stored with ID {} ({} replica(s))",
                original_name,
                result.primary.id,
                result.replicas.len()
            ),
            Severity::Info,
        ));

        Ok(result)
    }

    /// File record for `id` as seen by `app_id`, with its bucket.
    async fn scoped_file(&self, app_id: Uuid, id: Uuid) -> GatewayResult<(FileMetadata, Bucket)> {
        let mut meta = self
            .store()
            .get_file(id, app_id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("file {id}")))?;

        let bucket = self
            .store()
            .get_bucket(meta.bucket_id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("bucket {}", meta.bucket_id)))?;

        meta.is_ciphered = bucket.cipher;
        Ok((meta, bucket))
    }

    /// Metadata of a file owned by `app_id`.
    pub async fn get_metadata(&self, app_id: Uuid, id: Uuid) -> GatewayResult<FileMetadata> {
        self.scoped_file(app_id, id).await.map(|(meta, _)| meta)
    }

    /// Open a file owned by `app_id` for reading.
    pub async fn download_file(&self, app_id: Uuid, id: Uuid) -> GatewayResult<Download> {
        self.audit.emit(AuditEvent::new(
            AuditAction::FileDownload,
            format!("Downloading file ID: {id}"),
            Severity::Info,
        ));

        let (meta, bucket) = self.scoped_file(app_id, id).await?;

        match self.io.open(&bucket, &meta).await {
            Ok(body) => Ok(Download { meta, body }),
            Err(err) => {
                if is_decryption_failure(&err) {
                    error!(file_id = %id, bucket = %bucket.name, "decryption failed: {}", err);
                    self.audit.emit(AuditEvent::new(
                        AuditAction::DecryptionFailed,
                        format!("Critical: Failed to decrypt file {id}"),
                        Severity::Error,
                    ));
                } else {
                    error!(file_id = %id, bucket = %bucket.name, "download failed: {}", err);
                }
                Err(err)
            }
        }
    }
}

fn is_decryption_failure(err: &GatewayError) -> bool {
    matches!(
        err,
        GatewayError::Crypto(_)
            | GatewayError::Provider(ProviderError::Crypto {
                source: CryptoError::Integrity | CryptoError::Malformed(_),
                ..
            })
    )
}
