use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;

use crate::config::S3Settings;
use crate::error::{AppError, AppResult};
use crate::services::blob::BlobStore;

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    pub bucket_name: String,
}

impl S3BlobStore {
    pub async fn new(settings: &S3Settings) -> Self {
        let region = aws_sdk_s3::config::Region::new(settings.region.clone());

        let mut s3_config_builder = match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let credentials = aws_sdk_s3::config::Credentials::new(
                    key_id.clone(),
                    secret.clone(),
                    None,
                    None,
                    "manual_config",
                );
                aws_sdk_s3::config::Builder::new()
                    .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials)
            }
            // Fall back to the default provider chain (env, profile, instance role).
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &settings.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Self {
            client,
            bucket_name: settings.bucket_name.clone(),
        }
    }

    pub async fn ensure_bucket_exists(&self) -> AppResult<()> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        tracing::info!(bucket = %self.bucket_name, "bucket does not exist, attempting to create");
        self.client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
            .map_err(|e| {
                AppError::Internal(format!("failed to create S3 bucket {}: {}", self.bucket_name, e))
            })?;
        Ok(())
    }

    async fn put_stream(&self, key: &str, body: ByteStream, content_type: &str) -> AppResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("failed to upload {} to S3: {}", key, e)))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> AppResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| AppError::Internal(format!("failed to open {}: {}", path.display(), e)))?;
        self.put_stream(key, body, content_type).await
    }

    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> AppResult<()> {
        self.put_stream(key, ByteStream::from(data), content_type).await
    }

    async fn fetch_to_file(&self, key: &str, dest: &Path) -> AppResult<()> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    AppError::NotFound(format!("blob '{}' not found", key))
                } else {
                    AppError::Internal(format!("failed to download {} from S3: {}", key, e))
                }
            })?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = resp.body;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| AppError::Internal(format!("failed to read S3 body for {}: {}", key, e)))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => Ok(false),
            Err(e) => Err(AppError::Internal(format!("failed to stat {} in S3: {}", key, e))),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<()> {
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| AppError::Internal(format!("failed to list {} in S3: {}", prefix, e)))?;

            let objects: Vec<ObjectIdentifier> = page
                .contents()
                .iter()
                .filter_map(|obj| obj.key())
                .filter_map(|key| ObjectIdentifier::builder().key(key).build().ok())
                .collect();

            if !objects.is_empty() {
                let delete = Delete::builder()
                    .set_objects(Some(objects))
                    .build()
                    .map_err(|e| AppError::Internal(format!("invalid S3 delete request: {}", e)))?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket_name)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| {
                        AppError::Internal(format!("failed to delete {} from S3: {}", prefix, e))
                    })?;
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }
        Ok(())
    }
}
