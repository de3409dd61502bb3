//! Content-addressed blob storage for sources, thumbnails and renditions.
//!
//! Keys are `/`-separated and always start with the asset hash, so every
//! object belonging to an asset can be removed with one `delete_prefix`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::models::quality::Quality;

pub fn source_key(hash: &str) -> String {
    format!("{}/source", hash)
}

pub fn thumbnail_key(hash: &str) -> String {
    format!("{}/thumbnail.jpg", hash)
}

pub fn segment_name(index: u32) -> String {
    format!("seg_{:05}.ts", index)
}

pub fn segment_key(hash: &str, quality: Quality, index: u32) -> String {
    format!("{}/{}/{}", hash, quality, segment_name(index))
}

pub fn playlist_key(hash: &str, quality: Quality) -> String {
    format!("{}/{}/index.m3u8", hash, quality)
}

pub fn master_playlist_key(hash: &str) -> String {
    format!("{}/master.m3u8", hash)
}

pub fn asset_prefix(hash: &str) -> String {
    format!("{}/", hash)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the file at `path` under `key`, replacing any existing object.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> AppResult<()>;

    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> AppResult<()>;

    /// Downloads `key` into `dest`. Fails with `NotFound` if the object is absent.
    async fn fetch_to_file(&self, key: &str, dest: &Path) -> AppResult<()>;

    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Removes every object whose key starts with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> AppResult<()>;
}

/// Blob store on the local filesystem, one file per key.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part == ".") {
            return Err(AppError::InvalidArgument(format!("invalid blob key '{}'", key)));
        }
        Ok(self.root.join(key.trim_start_matches('/')))
    }

    async fn ensure_parent(path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> AppResult<()> {
        let dest = self.path_for(key)?;
        Self::ensure_parent(&dest).await?;
        let tmp = dest.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::copy(path, &tmp).await?;
        fs::rename(&tmp, &dest).await?;
        Ok(())
    }

    async fn put_bytes(&self, key: &str, data: Vec<u8>, _content_type: &str) -> AppResult<()> {
        let dest = self.path_for(key)?;
        Self::ensure_parent(&dest).await?;
        let tmp = dest.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &dest).await?;
        Ok(())
    }

    async fn fetch_to_file(&self, key: &str, dest: &Path) -> AppResult<()> {
        let src = self.path_for(key)?;
        if !fs::try_exists(&src).await? {
            return Err(AppError::NotFound(format!("blob '{}' not found", key)));
        }
        Self::ensure_parent(dest).await?;
        fs::copy(&src, dest).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(fs::try_exists(self.path_for(key)?).await?)
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<()> {
        let target = self.path_for(prefix.trim_end_matches('/'))?;
        match fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target).await?,
            Ok(_) => fs::remove_file(&target).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_fetch_and_delete_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).await.unwrap();

        store
            .put_bytes(&segment_key("abc", Quality::P360, 0), b"seg".to_vec(), "video/mp2t")
            .await
            .unwrap();
        store
            .put_bytes(&source_key("abc"), b"src".to_vec(), "video/mp4")
            .await
            .unwrap();
        assert!(store.exists("abc/360p/seg_00000.ts").await.unwrap());

        let dest = dir.path().join("out/source");
        store.fetch_to_file(&source_key("abc"), &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"src");

        store.delete_prefix(&asset_prefix("abc")).await.unwrap();
        assert!(!store.exists(&source_key("abc")).await.unwrap());
        // Deleting again is a no-op.
        store.delete_prefix(&asset_prefix("abc")).await.unwrap();
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        let err = store
            .fetch_to_file("nope/source", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        assert!(store.exists("../etc/passwd").await.is_err());
    }
}
