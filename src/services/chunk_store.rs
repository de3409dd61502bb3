//! Filesystem staging for upload chunks.
//!
//! Layout under the staging root:
//!
//! ```text
//! <upload_id>/session.json   manifest written at init
//! <upload_id>/<index>.part   one file per received chunk
//! ```
//!
//! Chunks are written to a unique temp file and renamed into place, so a
//! re-put of an index atomically replaces the previous bytes and a reader
//! never sees a half-written chunk.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const MANIFEST: &str = "session.json";
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub upload_id: Uuid,
    pub filename: String,
    pub total_chunks: u32,
    pub created_at: DateTime<Utc>,
}

/// A staged session found on disk at startup.
#[derive(Debug, Clone)]
pub struct RecoveredSession {
    pub manifest: SessionManifest,
    pub received: BTreeSet<u32>,
}

#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

/// The session directory vanishing mid-write means the session was purged.
fn session_gone(err: std::io::Error, upload_id: Uuid) -> AppError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AppError::NotFound(format!("upload {} not found", upload_id))
    } else {
        err.into()
    }
}

impl ChunkStore {
    pub async fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn session_dir(&self, upload_id: Uuid) -> PathBuf {
        self.root.join(upload_id.to_string())
    }

    pub fn chunk_path(&self, upload_id: Uuid, index: u32) -> PathBuf {
        self.session_dir(upload_id)
            .join(format!("{}{}", index, PART_SUFFIX))
    }

    pub async fn create_session(&self, manifest: &SessionManifest) -> AppResult<()> {
        let dir = self.session_dir(manifest.upload_id);
        fs::create_dir_all(&dir).await?;
        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|e| AppError::Internal(format!("failed to encode session manifest: {}", e)))?;
        fs::write(dir.join(MANIFEST), body).await?;
        Ok(())
    }

    pub async fn write_chunk(&self, upload_id: Uuid, index: u32, data: &[u8]) -> AppResult<()> {
        let dir = self.session_dir(upload_id);
        if !fs::try_exists(&dir).await? {
            return Err(AppError::NotFound(format!("upload {} not found", upload_id)));
        }

        let tmp = dir.join(format!("{}{}.tmp-{}", index, PART_SUFFIX, Uuid::new_v4()));
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| session_gone(e, upload_id))?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, self.chunk_path(upload_id, index)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(session_gone(e, upload_id));
        }
        Ok(())
    }

    /// Deletes the session directory and every chunk in it.
    pub async fn remove(&self, upload_id: Uuid) -> AppResult<()> {
        match fs::remove_dir_all(self.session_dir(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds sessions from manifests and part files left on disk.
    /// Directories without a readable manifest are skipped.
    pub async fn recover(&self) -> AppResult<Vec<RecoveredSession>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let manifest: SessionManifest = match fs::read(dir.join(MANIFEST)).await {
                Ok(raw) => match serde_json::from_slice(&raw) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), "unreadable session manifest: {}", e);
                        continue;
                    }
                },
                Err(_) => continue,
            };

            let mut received = BTreeSet::new();
            let mut parts = fs::read_dir(&dir).await?;
            while let Some(part) = parts.next_entry().await? {
                let name = part.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(index) = name
                    .strip_suffix(PART_SUFFIX)
                    .and_then(|n| n.parse::<u32>().ok())
                {
                    if index < manifest.total_chunks {
                        received.insert(index);
                    }
                }
            }

            sessions.push(RecoveredSession { manifest, received });
        }

        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(total_chunks: u32) -> SessionManifest {
        SessionManifest {
            upload_id: Uuid::new_v4(),
            filename: "clip.mp4".to_string(),
            total_chunks,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rewrite_replaces_chunk_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).await.unwrap();
        let m = manifest(2);
        store.create_session(&m).await.unwrap();

        store.write_chunk(m.upload_id, 0, b"first").await.unwrap();
        store.write_chunk(m.upload_id, 0, b"second").await.unwrap();

        let data = std::fs::read(store.chunk_path(m.upload_id, 0)).unwrap();
        assert_eq!(data, b"second");
    }

    #[tokio::test]
    async fn write_to_unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).await.unwrap();
        let err = store.write_chunk(Uuid::new_v4(), 0, b"x").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn write_after_session_removed_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).await.unwrap();
        let m = manifest(2);
        store.create_session(&m).await.unwrap();
        store.write_chunk(m.upload_id, 0, b"a").await.unwrap();
        store.remove(m.upload_id).await.unwrap();

        let err = store.write_chunk(m.upload_id, 1, b"b").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn vanished_session_dir_maps_to_not_found() {
        let id = Uuid::new_v4();
        let gone = session_gone(std::io::Error::from(std::io::ErrorKind::NotFound), id);
        assert!(matches!(gone, AppError::NotFound(_)));

        let denied = session_gone(std::io::Error::from(std::io::ErrorKind::PermissionDenied), id);
        assert!(matches!(denied, AppError::Io(_)));
    }

    #[tokio::test]
    async fn recover_finds_manifest_and_parts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).await.unwrap();
        let m = manifest(4);
        store.create_session(&m).await.unwrap();
        store.write_chunk(m.upload_id, 3, b"d").await.unwrap();
        store.write_chunk(m.upload_id, 1, b"b").await.unwrap();
        std::fs::create_dir_all(dir.path().join("stray")).unwrap();

        let recovered = store.recover().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].manifest, m);
        assert_eq!(recovered[0].received, BTreeSet::from([1, 3]));

        store.remove(m.upload_id).await.unwrap();
        assert!(store.recover().await.unwrap().is_empty());
    }
}
