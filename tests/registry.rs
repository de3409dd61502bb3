mod common;

use std::time::Duration;

use chrono::Utc;

use common::{test_app, upload, HD_SOURCE};
use media_transcode_kit::entities::asset::AssetStatus;
use media_transcode_kit::error::AppError;
use media_transcode_kit::services::cleanup::CleanupService;
use media_transcode_kit::services::registry::MetadataUpdate;

#[tokio::test]
async fn scheduled_assets_publish_when_due() {
    let app = test_app(HD_SOURCE).await;
    let asset = upload(&app.state, b"scheduled-video-bytes", 1, &[0]).await;
    let registry = &app.state.registry;

    let at = Utc::now() + chrono::Duration::hours(1);
    let scheduled = registry.schedule(&asset.hash, at).await.unwrap();
    assert_eq!(scheduled.status, AssetStatus::Scheduled);

    assert_eq!(registry.publish_due(Utc::now()).await.unwrap(), 0);
    assert_eq!(
        registry
            .publish_due(Utc::now() + chrono::Duration::hours(2))
            .await
            .unwrap(),
        1
    );

    let published = registry.get(&asset.hash).await.unwrap();
    assert_eq!(published.status, AssetStatus::Published);
    assert!(published.scheduled_at.is_none());
}

#[tokio::test]
async fn schedule_in_the_past_is_rejected() {
    let app = test_app(HD_SOURCE).await;
    let asset = upload(&app.state, b"past", 1, &[0]).await;
    let err = app
        .state
        .registry
        .schedule(&asset.hash, Utc::now() - chrono::Duration::minutes(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));
}

#[tokio::test]
async fn metadata_updates_keep_untouched_fields() {
    let app = test_app(HD_SOURCE).await;
    let asset = upload(&app.state, b"metadata", 1, &[0]).await;
    assert_eq!(asset.title, "clip");

    let registry = &app.state.registry;
    let updated = registry
        .update_metadata(
            &asset.hash,
            MetadataUpdate {
                title: None,
                description: Some("  beach day ".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "clip");
    assert_eq!(updated.description.as_deref(), Some("beach day"));

    let err = registry
        .update_metadata(
            &asset.hash,
            MetadataUpdate {
                title: Some(" ".to_string()),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidArgument(_)));
}

#[tokio::test]
async fn cleanup_pass_keeps_fresh_sessions() {
    let app = test_app(HD_SOURCE).await;
    app.state.uploads.init("fresh.mp4", 2).await.unwrap();

    let cleanup = CleanupService::new(
        app.state.uploads.clone(),
        app.state.registry.clone(),
        Duration::from_secs(60),
    );
    cleanup.run_once().await;
    assert_eq!(app.state.uploads.session_count().await, 1);
}
