use super::{expect_backend, ArchiveStorage};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use kitforge_core::config::StorageSettings;
use kitforge_core::ledger::{StorageBackendKind, StorageHandle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// S3-compatible bucket. Keys are `<prefix>/<archive filename>`.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    prefix: String,
    url_expiry: Duration,
}

fn backend_err(e: impl std::error::Error) -> StorageError {
    StorageError::Backend(DisplayErrorContext(e).to_string())
}

impl ObjectStorage {
    /// Credentials come from the standard AWS provider chain.
    pub async fn from_settings(settings: &StorageSettings) -> StorageResult<Self> {
        let bucket = settings
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| StorageError::Config("object storage requires a bucket".into()))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Ok(Self::with_client(
            client,
            bucket,
            &settings.prefix,
            Duration::from_secs(settings.url_expiry_secs),
        ))
    }

    pub fn with_client(client: Client, bucket: String, prefix: &str, url_expiry: Duration) -> Self {
        Self {
            client,
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
            url_expiry,
        }
    }

    pub fn key_for(&self, filename: &str) -> String {
        if self.prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.prefix, filename)
        }
    }
}

#[async_trait]
impl ArchiveStorage for ObjectStorage {
    fn kind(&self) -> StorageBackendKind {
        StorageBackendKind::Object
    }

    async fn store(&self, archive_path: &Path) -> StorageResult<StorageHandle> {
        let filename = archive_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::NotFound(archive_path.display().to_string()))?;
        let key = self.key_for(filename);
        let body = tokio::fs::read(archive_path).await?;
        let size = body.len();

        let upload = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/zip")
            .body(ByteStream::from(body))
            .send()
            .await;
        if let Err(e) = upload {
            let reason = DisplayErrorContext(e).to_string();
            warn!(path = %archive_path.display(), %reason, "archive upload failed; kept locally");
            return Err(StorageError::Upload {
                path: archive_path.to_path_buf(),
                reason,
            });
        }

        info!(bucket = %self.bucket, key = %key, size, "archive uploaded");
        if let Err(e) = tokio::fs::remove_file(archive_path).await {
            warn!(path = %archive_path.display(), error = %e, "could not remove uploaded archive");
        }
        Ok(StorageHandle {
            backend: StorageBackendKind::Object,
            key,
        })
    }

    async fn resolve(&self, handle: &StorageHandle) -> StorageResult<Option<String>> {
        expect_backend(handle, StorageBackendKind::Object)?;
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .send()
            .await;
        match head {
            Ok(_) => {}
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Ok(None);
            }
            Err(e) => return Err(backend_err(e)),
        }

        let presign = PresigningConfig::expires_in(self.url_expiry).map_err(backend_err)?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .presigned(presign)
            .await
            .map_err(backend_err)?;
        Ok(Some(request.uri().to_string()))
    }

    async fn fetch(&self, handle: &StorageHandle) -> StorageResult<Vec<u8>> {
        expect_backend(handle, StorageBackendKind::Object)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(handle.key.clone())
                } else {
                    backend_err(e)
                }
            })?;
        let data = output.body.collect().await.map_err(backend_err)?;
        Ok(data.into_bytes().to_vec())
    }

    async fn discard(&self, handle: &StorageHandle) -> StorageResult<()> {
        expect_backend(handle, StorageBackendKind::Object)?;
        // S3 answers 204 for absent keys too.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .send()
            .await
            .map_err(backend_err)?;
        info!(bucket = %self.bucket, key = %handle.key, "archive deleted");
        Ok(())
    }
}
