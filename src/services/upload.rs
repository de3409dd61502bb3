//! Upload coordinator: `init -> chunk* -> complete`.
//!
//! Chunk puts are independent and may arrive concurrently in any order.
//! `complete` is the single serialization point: it claims the session with
//! an atomic flag, assembles chunks strictly by index while hashing, and
//! hands the result to the blob store.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::blob::{source_key, BlobStore};
use crate::services::chunk_store::{ChunkStore, SessionManifest};

const COPY_BUF: usize = 256 * 1024;

/// Upper bound on `total_chunks` unless overridden.
pub const DEFAULT_MAX_TOTAL_CHUNKS: u32 = 10_000;

#[derive(Debug)]
struct UploadSession {
    manifest: SessionManifest,
    received: Mutex<BTreeSet<u32>>,
    completing: AtomicBool,
}

impl UploadSession {
    fn new(manifest: SessionManifest, received: BTreeSet<u32>) -> Self {
        Self {
            manifest,
            received: Mutex::new(received),
            completing: AtomicBool::new(false),
        }
    }

    fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.manifest
            .created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// What a client needs to resume an interrupted upload.
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct UploadProgress {
    pub upload_id: Uuid,
    pub filename: String,
    pub total_chunks: u32,
    pub received: Vec<u32>,
    pub missing: Vec<u32>,
}

/// Result of a successful `complete`.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub hash: String,
    pub filename: String,
    pub size_bytes: u64,
    /// Local copy of the assembled file, shared with the transcoder.
    pub source_path: PathBuf,
}

pub struct UploadCoordinator {
    store: ChunkStore,
    blobs: Arc<dyn BlobStore>,
    sessions: RwLock<HashMap<Uuid, Arc<UploadSession>>>,
    ttl: Duration,
    source_root: PathBuf,
    max_total_chunks: u32,
}

/// Local cache path of an asset's source file under the work dir.
pub fn local_source_path(work_dir: &Path, hash: &str) -> PathBuf {
    work_dir.join(hash).join("source")
}

fn missing_indices(received: &BTreeSet<u32>, total: u32) -> Vec<u32> {
    (0..total).filter(|i| !received.contains(i)).collect()
}

fn sanitize_filename(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

impl UploadCoordinator {
    pub fn new(
        store: ChunkStore,
        blobs: Arc<dyn BlobStore>,
        ttl: Duration,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            blobs,
            sessions: RwLock::new(HashMap::new()),
            ttl,
            source_root: source_root.into(),
            max_total_chunks: DEFAULT_MAX_TOTAL_CHUNKS,
        }
    }

    pub fn with_max_total_chunks(mut self, max_total_chunks: u32) -> Self {
        self.max_total_chunks = max_total_chunks;
        self
    }

    /// Reloads sessions staged before a restart. Returns how many were found.
    pub async fn recover(&self) -> AppResult<usize> {
        let recovered = self.store.recover().await?;
        let count = recovered.len();
        let mut sessions = self.sessions.write().await;
        for r in recovered {
            tracing::info!(
                upload_id = %r.manifest.upload_id,
                received = r.received.len(),
                total = r.manifest.total_chunks,
                "recovered upload session"
            );
            sessions.insert(
                r.manifest.upload_id,
                Arc::new(UploadSession::new(r.manifest, r.received)),
            );
        }
        Ok(count)
    }

    pub async fn init(&self, filename: &str, total_chunks: i64) -> AppResult<Uuid> {
        if total_chunks <= 0 {
            return Err(AppError::InvalidArgument(
                "total_chunks must be greater than zero".to_string(),
            ));
        }
        let total_chunks = u32::try_from(total_chunks)
            .ok()
            .filter(|total| *total <= self.max_total_chunks)
            .ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "total_chunks {} exceeds the limit of {}",
                    total_chunks, self.max_total_chunks
                ))
            })?;
        let filename = sanitize_filename(filename);
        if filename.is_empty() {
            return Err(AppError::InvalidArgument("filename must not be empty".to_string()));
        }

        let manifest = SessionManifest {
            upload_id: Uuid::new_v4(),
            filename,
            total_chunks,
            created_at: Utc::now(),
        };
        self.store.create_session(&manifest).await?;

        let upload_id = manifest.upload_id;
        tracing::debug!(%upload_id, total_chunks, filename = %manifest.filename, "upload session created");
        self.sessions
            .write()
            .await
            .insert(upload_id, Arc::new(UploadSession::new(manifest, BTreeSet::new())));
        Ok(upload_id)
    }

    async fn session(&self, upload_id: Uuid) -> AppResult<Arc<UploadSession>> {
        let session = self
            .sessions
            .read()
            .await
            .get(&upload_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("upload {} not found", upload_id)))?;

        if session.expires_at(self.ttl) < Utc::now() {
            return Err(AppError::NotFound(format!("upload {} has expired", upload_id)));
        }
        Ok(session)
    }

    pub async fn put_chunk(&self, upload_id: Uuid, index: i64, data: &[u8]) -> AppResult<()> {
        let session = self.session(upload_id).await?;
        let total = session.manifest.total_chunks;
        if index < 0 || index >= total as i64 {
            return Err(AppError::OutOfRange { index, total });
        }
        if data.is_empty() {
            return Err(AppError::InvalidArgument("chunk body is empty".to_string()));
        }
        if session.completing.load(Ordering::Acquire) {
            return Err(AppError::Conflict(format!(
                "upload {} is already being completed",
                upload_id
            )));
        }

        let index = index as u32;
        self.store.write_chunk(upload_id, index, data).await?;
        session.received.lock().await.insert(index);
        tracing::debug!(%upload_id, index, bytes = data.len(), "chunk stored");
        Ok(())
    }

    pub async fn progress(&self, upload_id: Uuid) -> AppResult<UploadProgress> {
        let session = self.session(upload_id).await?;
        let received = session.received.lock().await.clone();
        Ok(UploadProgress {
            upload_id,
            filename: session.manifest.filename.clone(),
            total_chunks: session.manifest.total_chunks,
            missing: missing_indices(&received, session.manifest.total_chunks),
            received: received.into_iter().collect(),
        })
    }

    /// Assembles the upload and releases its session.
    pub async fn complete(&self, upload_id: Uuid) -> AppResult<CompletedUpload> {
        self.complete_with(upload_id, |done| async move { Ok(done) })
            .await
    }

    /// Assembles the upload and hands it to `register`. The session stays
    /// claimed until `register` succeeds; on any failure the claim is
    /// dropped and the staged chunks are kept so the client can retry.
    pub async fn complete_with<T, F, Fut>(&self, upload_id: Uuid, register: F) -> AppResult<T>
    where
        F: FnOnce(CompletedUpload) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let session = self.session(upload_id).await?;

        if session
            .completing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::Conflict(format!(
                "upload {} is already being completed",
                upload_id
            )));
        }

        let result = match self.assemble_and_store(&session).await {
            Ok(done) => {
                let (hash, size) = (done.hash.clone(), done.size_bytes);
                register(done).await.map(|value| (value, hash, size))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok((value, hash, size)) => {
                self.sessions.write().await.remove(&upload_id);
                if let Err(e) = self.store.remove(upload_id).await {
                    tracing::warn!(%upload_id, "failed to release chunk staging: {}", e);
                }
                tracing::info!(%upload_id, %hash, size, "upload assembled");
                Ok(value)
            }
            Err(e) => {
                session.completing.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn assemble_and_store(&self, session: &UploadSession) -> AppResult<CompletedUpload> {
        let upload_id = session.manifest.upload_id;
        let total = session.manifest.total_chunks;

        let missing = missing_indices(&*session.received.lock().await, total);
        if !missing.is_empty() {
            return Err(AppError::FailedPrecondition {
                message: format!(
                    "upload {} is missing {} of {} chunk(s)",
                    upload_id,
                    missing.len(),
                    total
                ),
                missing,
            });
        }

        fs::create_dir_all(&self.source_root).await?;
        let assembled = self
            .source_root
            .join(format!(".assembling-{}", upload_id));

        let result = self.assemble(upload_id, total, &assembled).await;
        let (hash, size_bytes) = match result {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&assembled).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .blobs
            .put_file(&source_key(&hash), &assembled, "application/octet-stream")
            .await
        {
            let _ = fs::remove_file(&assembled).await;
            return Err(e);
        }

        let source_path = local_source_path(&self.source_root, &hash);
        if let Some(parent) = source_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&assembled, &source_path).await?;

        Ok(CompletedUpload {
            hash,
            filename: session.manifest.filename.clone(),
            size_bytes,
            source_path,
        })
    }

    /// Concatenates chunks in index order into `dest`, returning the
    /// SHA-256 hex digest and total size.
    async fn assemble(&self, upload_id: Uuid, total: u32, dest: &Path) -> AppResult<(String, u64)> {
        let mut out = fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; COPY_BUF];

        for index in 0..total {
            let mut chunk = fs::File::open(self.store.chunk_path(upload_id, index))
                .await
                .map_err(|e| {
                    AppError::Internal(format!("chunk {} of upload {} unreadable: {}", index, upload_id, e))
                })?;
            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size += n as u64;
            }
        }
        out.sync_all().await?;

        Ok((format!("{:x}", hasher.finalize()), size))
    }

    /// Drops sessions older than the TTL that are not being completed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let expired: Vec<Uuid> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, s)| {
                    s.expires_at(self.ttl) < now && !s.completing.load(Ordering::Acquire)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                sessions.remove(id);
            }
            ids
        };

        for upload_id in &expired {
            tracing::info!(%upload_id, "purging expired upload session");
            self.store.remove(*upload_id).await?;
        }
        Ok(expired.len())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_stripped_of_directories() {
        assert_eq!(sanitize_filename("../../etc/clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("C:\\Users\\me\\movie.mov"), "movie.mov");
        assert_eq!(sanitize_filename("  "), "");
    }

    #[test]
    fn missing_lists_gaps() {
        let received = BTreeSet::from([0, 1, 3, 4]);
        assert_eq!(missing_indices(&received, 5), vec![2]);
        assert!(missing_indices(&received, 2).is_empty());
    }
}
