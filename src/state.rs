use std::sync::Arc;

use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::config::{BlobBackend, Config};
use crate::entities::asset;
use crate::error::{AppError, AppResult};
use crate::models::quality::Quality;
use crate::models::status::JobSnapshot;
use crate::services::blob::{asset_prefix, thumbnail_key, BlobStore, LocalBlobStore};
use crate::services::chunk_store::ChunkStore;
use crate::services::encoder::Encoder;
use crate::services::job_store::JobStore;
use crate::services::orchestrator::{OrchestratorSettings, TranscodeOrchestrator};
use crate::services::registry::{AssetRegistry, NewAsset};
use crate::services::s3::S3BlobStore;
use crate::services::upload::UploadCoordinator;
use crate::utils::image_processor::{make_thumbnail, THUMBNAIL_MAX_WIDTH};

/// Shared handles passed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub uploads: Arc<UploadCoordinator>,
    pub registry: AssetRegistry,
    pub orchestrator: Arc<TranscodeOrchestrator>,
    pub encoder: Arc<dyn Encoder>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Opens the blob store selected by `BLOB_BACKEND`.
pub async fn open_blob_store(config: &Config) -> AppResult<Arc<dyn BlobStore>> {
    match (&config.blob_backend, &config.s3) {
        (BlobBackend::S3, Some(settings)) => {
            let store = S3BlobStore::new(settings).await;
            store.ensure_bucket_exists().await?;
            tracing::info!(bucket = %store.bucket_name, "using S3 blob store");
            Ok(Arc::new(store))
        }
        (BlobBackend::S3, None) => Err(AppError::InvalidArgument(
            "S3 blob backend selected without S3 settings".to_string(),
        )),
        (BlobBackend::Local, _) => {
            tracing::info!(root = %config.blob_dir.display(), "using local blob store");
            Ok(Arc::new(LocalBlobStore::new(&config.blob_dir).await?))
        }
    }
}

impl AppState {
    pub async fn new(
        config: Arc<Config>,
        db: DatabaseConnection,
        encoder: Arc<dyn Encoder>,
        blobs: Arc<dyn BlobStore>,
    ) -> AppResult<Self> {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        let chunks = ChunkStore::new(&config.staging_dir).await?;
        let uploads = UploadCoordinator::new(
            chunks,
            blobs.clone(),
            config.upload_session_ttl,
            config.work_dir.clone(),
        )
        .with_max_total_chunks(config.max_total_chunks);
        let orchestrator = TranscodeOrchestrator::new(
            JobStore::new(db.clone()),
            encoder.clone(),
            blobs.clone(),
            OrchestratorSettings::from_config(&config),
        );

        Ok(Self {
            registry: AssetRegistry::new(db.clone()),
            uploads: Arc::new(uploads),
            orchestrator: Arc::new(orchestrator),
            config,
            db,
            encoder,
            blobs,
        })
    }

    /// Reloads staged uploads and persisted jobs after a restart.
    pub async fn recover(&self) -> AppResult<()> {
        let uploads = self.uploads.recover().await?;
        let jobs = self.orchestrator.recover().await?;
        tracing::info!(uploads, jobs, "state recovered");
        Ok(())
    }

    /// Assembles an upload and registers the resulting asset, probing the
    /// source for its resolution. A failed probe still registers the asset.
    pub async fn finish_upload(&self, upload_id: Uuid) -> AppResult<asset::Model> {
        self.uploads
            .complete_with(upload_id, move |done| async move {
                let source = match self.encoder.probe(&done.source_path).await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        tracing::warn!(hash = %done.hash, "could not probe uploaded source: {}", e);
                        None
                    }
                };

                self.registry
                    .register(NewAsset {
                        hash: done.hash,
                        filename: done.filename,
                        size_bytes: done.size_bytes,
                        source,
                    })
                    .await
            })
            .await
    }

    /// Starts a transcode for a registered asset.
    pub async fn trigger_transcode(&self, hash: &str, qualities: &[Quality]) -> AppResult<JobSnapshot> {
        self.registry.get(hash).await?;
        self.orchestrator.trigger(hash, qualities).await
    }

    /// Deletes an asset with its job, renditions and thumbnail. Refused
    /// while a transcode is active. The asset is dropped under the job's
    /// control lock, so a racing trigger either sees the job removed or
    /// finds no asset.
    pub async fn delete_video(&self, hash: &str) -> AppResult<()> {
        self.registry.get(hash).await?;
        self.orchestrator
            .remove(hash, move || async move {
                if !self.registry.delete(hash).await? {
                    return Err(AppError::NotFound(format!("video {} not found", hash)));
                }
                self.blobs.delete_prefix(&asset_prefix(hash)).await
            })
            .await?;
        tracing::info!(hash = %hash, "video deleted");
        Ok(())
    }

    pub async fn store_thumbnail(&self, hash: &str, data: Vec<u8>) -> AppResult<asset::Model> {
        self.registry.get(hash).await?;
        let jpeg = tokio::task::spawn_blocking(move || make_thumbnail(&data, THUMBNAIL_MAX_WIDTH))
            .await
            .map_err(|e| AppError::Internal(format!("thumbnail task failed: {}", e)))??;

        let key = thumbnail_key(hash);
        self.blobs.put_bytes(&key, jpeg, "image/jpeg").await?;
        self.registry.set_thumbnail(hash, &key).await
    }
}
