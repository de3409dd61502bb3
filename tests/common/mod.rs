#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

use media_transcode_kit::config::Config;
use media_transcode_kit::entities::asset;
use media_transcode_kit::error::{AppError, AppResult};
use media_transcode_kit::models::quality::Quality;
use media_transcode_kit::models::status::JobSnapshot;
use media_transcode_kit::services::blob::LocalBlobStore;
use media_transcode_kit::services::encoder::{Encoder, SegmentRequest, SourceInfo};
use media_transcode_kit::AppState;

pub const HD_SOURCE: SourceInfo = SourceInfo {
    width: 1920,
    height: 1080,
    duration_ms: 18_000,
};

/// Encoder double. Segments of a gated quality block until permits are
/// released for it; every finished segment is recorded.
pub struct FakeEncoder {
    info: SourceInfo,
    gates: Mutex<HashMap<Quality, Arc<Semaphore>>>,
    failing: Mutex<HashSet<Quality>>,
    encoded: Mutex<Vec<(Quality, u32)>>,
}

impl FakeEncoder {
    pub fn new(info: SourceInfo) -> Self {
        Self {
            info,
            gates: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            encoded: Mutex::new(Vec::new()),
        }
    }

    pub fn gate(&self, quality: Quality) {
        self.gates
            .lock()
            .unwrap()
            .insert(quality, Arc::new(Semaphore::new(0)));
    }

    /// Lets `segments` more segments of `quality` through.
    pub fn release(&self, quality: Quality, segments: usize) {
        if let Some(gate) = self.gates.lock().unwrap().get(&quality) {
            gate.add_permits(segments);
        }
    }

    pub fn fail(&self, quality: Quality) {
        self.failing.lock().unwrap().insert(quality);
    }

    pub fn encoded(&self, quality: Quality) -> Vec<u32> {
        self.encoded
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _)| *q == quality)
            .map(|(_, i)| *i)
            .collect()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn probe(&self, _source: &Path) -> AppResult<SourceInfo> {
        Ok(self.info)
    }

    async fn encode_segment(&self, req: SegmentRequest<'_>) -> AppResult<()> {
        let gate = self.gates.lock().unwrap().get(&req.quality).cloned();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?
                .forget();
        }
        if self.failing.lock().unwrap().contains(&req.quality) {
            return Err(AppError::Internal(format!("encoder exploded on {}", req.quality)));
        }
        if let Some(parent) = req.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(req.output, format!("{}:{}", req.quality, req.index)).await?;
        self.encoded.lock().unwrap().push((req.quality, req.index));
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub encoder: Arc<FakeEncoder>,
    pub dir: TempDir,
}

pub async fn memory_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        staging_dir: dir.join("staging"),
        work_dir: dir.join("work"),
        blob_dir: dir.join("blobs"),
        max_parallel_encodes: 3,
        segment_secs: 6,
        ..Config::default()
    }
}

pub async fn test_app(info: SourceInfo) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = memory_db().await;
    let config = test_config(dir.path());
    let blobs = Arc::new(LocalBlobStore::new(config.blob_dir.clone()).await.unwrap());
    let encoder = Arc::new(FakeEncoder::new(info));

    let state = AppState::new(Arc::new(config), db, encoder.clone(), blobs)
        .await
        .unwrap();
    TestApp { state, encoder, dir }
}

/// Uploads `data` in `chunks` pieces, sending them in the given order.
pub async fn upload(state: &AppState, data: &[u8], chunks: usize, order: &[usize]) -> asset::Model {
    let pieces: Vec<&[u8]> = data.chunks(data.len().div_ceil(chunks)).collect();
    assert_eq!(pieces.len(), chunks);
    let upload_id: Uuid = state.uploads.init("clip.mp4", chunks as i64).await.unwrap();
    for &i in order {
        state.uploads.put_chunk(upload_id, i as i64, pieces[i]).await.unwrap();
    }
    state.finish_upload(upload_id).await.unwrap()
}

pub async fn wait_for<F>(state: &AppState, hash: &str, pred: F) -> JobSnapshot
where
    F: Fn(&JobSnapshot) -> bool,
{
    let mut rx = state.orchestrator.subscribe(hash).await;
    let seen = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for job state")
        .expect("status channel closed");
    (*seen).clone()
}
