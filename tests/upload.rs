mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::ConnectionTrait;
use sha2::{Digest, Sha256};

use common::{test_app, upload, HD_SOURCE};
use media_transcode_kit::error::AppError;
use media_transcode_kit::services::blob::{source_key, BlobStore, LocalBlobStore};
use media_transcode_kit::services::chunk_store::ChunkStore;
use media_transcode_kit::services::upload::{UploadCoordinator, DEFAULT_MAX_TOTAL_CHUNKS};

async fn coordinator(root: &std::path::Path) -> UploadCoordinator {
    let chunks = ChunkStore::new(root.join("staging")).await.unwrap();
    let blobs = Arc::new(LocalBlobStore::new(root.join("blobs")).await.unwrap());
    UploadCoordinator::new(chunks, blobs, Duration::from_secs(6 * 3600), root.join("work"))
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[tokio::test]
async fn out_of_order_chunks_assemble_by_index() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = coordinator(dir.path()).await;

    let id = uploads.init("clip.mp4", 3).await.unwrap();
    uploads.put_chunk(id, 2, b"cc").await.unwrap();
    uploads.put_chunk(id, 0, b"aa").await.unwrap();
    uploads.put_chunk(id, 1, b"bb").await.unwrap();

    let done = uploads.complete(id).await.unwrap();
    assert_eq!(done.hash, sha256_hex(b"aabbcc"));
    assert_eq!(done.size_bytes, 6);
    assert_eq!(done.filename, "clip.mp4");
    assert_eq!(tokio::fs::read(&done.source_path).await.unwrap(), b"aabbcc");

    let blobs = LocalBlobStore::new(dir.path().join("blobs")).await.unwrap();
    assert!(blobs.exists(&source_key(&done.hash)).await.unwrap());
    assert_eq!(uploads.session_count().await, 0);
}

#[tokio::test]
async fn rewriting_a_chunk_replaces_it() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = coordinator(dir.path()).await;

    let id = uploads.init("clip.mp4", 2).await.unwrap();
    uploads.put_chunk(id, 0, b"first").await.unwrap();
    uploads.put_chunk(id, 0, b"xy").await.unwrap();
    uploads.put_chunk(id, 1, b"z").await.unwrap();

    let progress = uploads.progress(id).await.unwrap();
    assert_eq!(progress.received, vec![0, 1]);

    let done = uploads.complete(id).await.unwrap();
    assert_eq!(done.hash, sha256_hex(b"xyz"));
}

#[tokio::test]
async fn complete_reports_missing_indices() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = coordinator(dir.path()).await;

    let id = uploads.init("clip.mp4", 5).await.unwrap();
    for i in [0, 1, 3, 4] {
        uploads.put_chunk(id, i, b"data").await.unwrap();
    }

    match uploads.complete(id).await {
        Err(AppError::FailedPrecondition { missing, .. }) => assert_eq!(missing, vec![2]),
        other => panic!("expected failed precondition, got {:?}", other.map(|d| d.hash)),
    }

    // The session survives a failed complete and can be finished.
    uploads.put_chunk(id, 2, b"data").await.unwrap();
    let done = uploads.complete(id).await.unwrap();
    assert_eq!(done.size_bytes, 20);
}

#[tokio::test]
async fn rejects_bad_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = coordinator(dir.path()).await;

    assert!(matches!(uploads.init("clip.mp4", 0).await, Err(AppError::InvalidArgument(_))));
    assert!(matches!(uploads.init("clip.mp4", -3).await, Err(AppError::InvalidArgument(_))));
    assert!(matches!(uploads.init("  ", 2).await, Err(AppError::InvalidArgument(_))));

    let id = uploads.init("clip.mp4", 2).await.unwrap();
    assert!(matches!(
        uploads.put_chunk(id, 2, b"x").await,
        Err(AppError::OutOfRange { index: 2, total: 2 })
    ));
    assert!(matches!(
        uploads.put_chunk(id, -1, b"x").await,
        Err(AppError::OutOfRange { index: -1, .. })
    ));
    assert!(matches!(uploads.put_chunk(id, 0, b"").await, Err(AppError::InvalidArgument(_))));

    let unknown = uuid::Uuid::new_v4();
    assert!(matches!(uploads.put_chunk(unknown, 0, b"x").await, Err(AppError::NotFound(_))));
    assert!(matches!(uploads.complete(unknown).await, Err(AppError::NotFound(_))));
    assert!(matches!(uploads.progress(unknown).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn concurrent_chunk_puts_are_all_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = Arc::new(coordinator(dir.path()).await);
    let id = uploads.init("clip.mp4", 16).await.unwrap();

    let mut tasks = Vec::new();
    for i in (0..16u8).rev() {
        let uploads = uploads.clone();
        tasks.push(tokio::spawn(async move {
            uploads.put_chunk(id, i as i64, &[i; 4]).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let progress = uploads.progress(id).await.unwrap();
    assert!(progress.missing.is_empty());
    assert_eq!(progress.received.len(), 16);

    let expected: Vec<u8> = (0..16u8).flat_map(|i| [i; 4]).collect();
    assert_eq!(uploads.complete(id).await.unwrap().hash, sha256_hex(&expected));
}

#[tokio::test]
async fn concurrent_completes_assemble_once() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = Arc::new(coordinator(dir.path()).await);
    let id = uploads.init("clip.mp4", 2).await.unwrap();
    uploads.put_chunk(id, 0, &[1u8; 4096]).await.unwrap();
    uploads.put_chunk(id, 1, &[2u8; 4096]).await.unwrap();

    let (a, b) = tokio::join!(
        {
            let uploads = uploads.clone();
            async move { uploads.complete(id).await }
        },
        {
            let uploads = uploads.clone();
            async move { uploads.complete(id).await }
        }
    );

    let results = [a, b];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    for r in &results {
        if let Err(e) = r {
            assert!(matches!(e, AppError::Conflict(_) | AppError::NotFound(_)), "{}", e);
        }
    }
}

#[tokio::test]
async fn expired_sessions_are_purged() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = coordinator(dir.path()).await;
    let id = uploads.init("clip.mp4", 2).await.unwrap();
    uploads.put_chunk(id, 0, b"x").await.unwrap();

    assert_eq!(uploads.purge_expired(Utc::now()).await.unwrap(), 0);
    let later = Utc::now() + chrono::Duration::hours(7);
    assert_eq!(uploads.purge_expired(later).await.unwrap(), 1);

    assert_eq!(uploads.session_count().await, 0);
    assert!(matches!(uploads.put_chunk(id, 1, b"y").await, Err(AppError::NotFound(_))));
    assert!(!tokio::fs::try_exists(dir.path().join("staging").join(id.to_string()))
        .await
        .unwrap());
}

#[tokio::test]
async fn staged_sessions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let uploads = coordinator(dir.path()).await;
        let id = uploads.init("clip.mp4", 3).await.unwrap();
        uploads.put_chunk(id, 0, b"aa").await.unwrap();
        uploads.put_chunk(id, 2, b"cc").await.unwrap();
        id
    };

    let uploads = coordinator(dir.path()).await;
    assert_eq!(uploads.recover().await.unwrap(), 1);

    let progress = uploads.progress(id).await.unwrap();
    assert_eq!(progress.received, vec![0, 2]);
    assert_eq!(progress.missing, vec![1]);

    uploads.put_chunk(id, 1, b"bb").await.unwrap();
    assert_eq!(uploads.complete(id).await.unwrap().hash, sha256_hex(b"aabbcc"));
}

#[tokio::test]
async fn same_content_registers_one_asset() {
    let app = test_app(HD_SOURCE).await;
    let data = b"identical bytes in both uploads!";

    let first = upload(&app.state, data, 2, &[0, 1]).await;
    let second = upload(&app.state, data, 4, &[3, 1, 2, 0]).await;
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.hash, sha256_hex(data));
    assert_eq!(second.original_resolution().as_deref(), Some("1920x1080"));

    let page = app.state.registry.list(1, 10).await.unwrap();
    assert_eq!(page.total_items, 1);
}

#[tokio::test]
async fn total_chunks_above_limit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = coordinator(dir.path()).await;
    let over = i64::from(DEFAULT_MAX_TOTAL_CHUNKS) + 1;
    assert!(matches!(uploads.init("clip.mp4", over).await, Err(AppError::InvalidArgument(_))));
    assert!(matches!(
        uploads.init("clip.mp4", i64::from(u32::MAX) + 1).await,
        Err(AppError::InvalidArgument(_))
    ));
    assert_eq!(uploads.session_count().await, 0);

    let uploads = coordinator(dir.path()).await.with_max_total_chunks(4);
    assert!(matches!(uploads.init("clip.mp4", 5).await, Err(AppError::InvalidArgument(_))));
    let id = uploads.init("clip.mp4", 4).await.unwrap();
    assert_eq!(uploads.progress(id).await.unwrap().missing, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn failed_registration_keeps_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = coordinator(dir.path()).await;
    let id = uploads.init("clip.mp4", 2).await.unwrap();
    uploads.put_chunk(id, 0, b"aa").await.unwrap();
    uploads.put_chunk(id, 1, b"bb").await.unwrap();

    let err = uploads
        .complete_with(id, |_| async {
            Err::<(), _>(AppError::Internal("registry unavailable".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));
    assert_eq!(uploads.session_count().await, 1);
    assert!(uploads.progress(id).await.unwrap().missing.is_empty());

    let hash = uploads
        .complete_with(id, |done| async move { Ok(done.hash) })
        .await
        .unwrap();
    assert_eq!(hash, sha256_hex(b"aabb"));
    assert_eq!(uploads.session_count().await, 0);
    assert!(matches!(uploads.progress(id).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn upload_can_be_finished_after_database_outage() {
    let app = test_app(HD_SOURCE).await;
    let uploads = &app.state.uploads;
    let id = uploads.init("clip.mp4", 2).await.unwrap();
    uploads.put_chunk(id, 0, b"left").await.unwrap();
    uploads.put_chunk(id, 1, b"right").await.unwrap();

    app.state
        .db
        .execute_unprepared("ALTER TABLE assets RENAME TO assets_offline")
        .await
        .unwrap();
    assert!(app.state.finish_upload(id).await.is_err());
    assert!(uploads.progress(id).await.unwrap().missing.is_empty());

    app.state
        .db
        .execute_unprepared("ALTER TABLE assets_offline RENAME TO assets")
        .await
        .unwrap();
    let asset = app.state.finish_upload(id).await.unwrap();
    assert_eq!(asset.hash, sha256_hex(b"leftright"));
    assert_eq!(uploads.session_count().await, 0);
}
