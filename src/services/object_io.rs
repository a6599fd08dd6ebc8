//! Single-target object primitives shared by the orchestrator and the
//! replication engine: write one payload into one bucket and record it, or
//! read one recorded object back.

use super::{GatewayError, GatewayResult, metadata_store::MetadataStore};
use crate::{
    crypto::Cipher,
    models::{bucket::Bucket, file_metadata::FileMetadata},
    providers::{ByteStream, ProviderRegistry, bytes_stream, collect_stream},
};
use bytes::Bytes;
use chrono::Utc;
use std::{path::Path, sync::Arc};
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 16;

/// A fully buffered payload ready to be written to one or more buckets.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub app_id: Uuid,
    pub original_name: String,
    pub content_type: String,
    /// MD5 hex digest of `payload`.
    pub checksum: String,
    pub payload: Bytes,
}

impl PendingUpload {
    pub fn new(app_id: Uuid, original_name: impl Into<String>, payload: Bytes) -> Self {
        let original_name = original_name.into();
        Self {
            app_id,
            content_type: content_type_for(&original_name),
            checksum: format!("{:x}", md5::compute(&payload)),
            original_name,
            payload,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObjectIo {
    pub store: MetadataStore,
    pub registry: Arc<ProviderRegistry>,
    pub cipher: Cipher,
}

impl ObjectIo {
    pub fn new(store: MetadataStore, registry: Arc<ProviderRegistry>, cipher: Cipher) -> Self {
        Self {
            store,
            registry,
            cipher,
        }
    }

    /// Write `upload` into `bucket` through its provider and record one
    /// metadata row for it.
    pub async fn write(&self, bucket: &Bucket, upload: &PendingUpload) -> GatewayResult<FileMetadata> {
        let strategy = self.registry.resolve(&bucket.provider_type)?;

        let id = Uuid::new_v4();
        let filename = physical_filename(id, &upload.original_name);
        let reference = strategy
            .upload(
                bytes_stream(upload.payload.clone()),
                &filename,
                &bucket.config,
                bucket.cipher,
            )
            .await?;

        let meta = FileMetadata {
            id,
            app_id: upload.app_id,
            bucket_id: bucket.id,
            original_name: upload.original_name.clone(),
            physical_path: reference,
            file_size: upload.payload.len() as i64,
            content_type: upload.content_type.clone(),
            checksum: upload.checksum.clone(),
            created_at: Utc::now(),
            is_ciphered: bucket.cipher,
        };

        if let Err(err) = self.store.insert_file(&meta).await {
            tracing::error!(
                bucket = %bucket.name,
                file_id = %id,
                physical = %meta.physical_path,
                "object stored but metadata insert failed: {}",
                err
            );
            return Err(err.into());
        }

        tracing::debug!(
            bucket = %bucket.name,
            provider = strategy.name(),
            file_id = %id,
            ciphered = bucket.cipher,
            "object written"
        );
        Ok(meta)
    }

    /// Open a recorded object. Sealed objects are read fully and opened
    /// before being handed back; plain objects stream straight through.
    pub async fn open(&self, bucket: &Bucket, meta: &FileMetadata) -> GatewayResult<ByteStream> {
        let strategy = self.registry.resolve(&bucket.provider_type)?;
        let raw = strategy.download(&meta.physical_path, &bucket.config).await?;

        if !bucket.cipher {
            return Ok(raw);
        }

        let sealed = collect_stream(raw).await?;
        let plain = self.cipher.decrypt(&sealed)?;
        Ok(bytes_stream(plain))
    }

    /// Read a recorded object fully into memory, opened if sealed.
    pub async fn read(&self, bucket: &Bucket, meta: &FileMetadata) -> GatewayResult<Bytes> {
        let stream = self.open(bucket, meta).await?;
        collect_stream(stream).await.map_err(GatewayError::from)
    }
}

/// `<id>.<ext>` where `ext` is the original extension when it is short and
/// alphanumeric; otherwise just `<id>`. The caller's name never reaches the
/// backend.
pub fn physical_filename(id: Uuid, original_name: &str) -> String {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| {
            !e.is_empty() && e.len() <= MAX_EXTENSION_LEN && e.chars().all(|c| c.is_ascii_alphanumeric())
        });
    match ext {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// MIME type guessed from the original name's extension.
pub fn content_type_for(original_name: &str) -> String {
    mime_guess::from_path(original_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_filename_keeps_only_extension() {
        let id = Uuid::new_v4();
        assert_eq!(physical_filename(id, "report.pdf"), format!("{id}.pdf"));
        assert_eq!(physical_filename(id, "../../etc/passwd"), id.to_string());
        assert_eq!(physical_filename(id, "../../x/evil.sh"), format!("{id}.sh"));
        assert_eq!(physical_filename(id, "archive.tar.gz"), format!("{id}.gz"));
        assert_eq!(physical_filename(id, "weird.p df"), id.to_string());
        assert_eq!(physical_filename(id, "noext"), id.to_string());
    }

    #[test]
    fn test_content_type_guess() {
        assert_eq!(content_type_for("report.pdf"), "application/pdf");
        assert_eq!(content_type_for("photo.PNG"), "image/png");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_pending_upload_checksum() {
        let upload = PendingUpload::new(Uuid::new_v4(), "a.txt", Bytes::from_static(b"hello"));
        assert_eq!(upload.checksum, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(upload.content_type, "text/plain");
    }
}
