use axum::{
    extract::{Multipart, Path, Query, State},
    response::Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::asset::{self, AssetStatus};
use crate::error::AppError;
use crate::models::status::{OverallStatus, QualitySnapshot};
use crate::pagination::{PaginatedResponse, Pagination};
use crate::services::registry::MetadataUpdate;
use crate::state::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct VideoResponse {
    pub hash: String,
    pub filename: String,
    pub title: String,
    pub description: Option<String>,
    pub size_bytes: i64,
    pub original_resolution: Option<String>,
    pub original_quality_label: Option<String>,
    pub thumbnail_key: Option<String>,
    pub status: AssetStatus,
    pub scheduled_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<asset::Model> for VideoResponse {
    fn from(model: asset::Model) -> Self {
        Self {
            original_resolution: model.original_resolution(),
            hash: model.hash,
            filename: model.filename,
            title: model.title,
            description: model.description,
            size_bytes: model.size_bytes,
            original_quality_label: model.original_quality_label,
            thumbnail_key: model.thumbnail_key,
            status: model.status,
            scheduled_at: model.scheduled_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct UpdateVideoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ControlResponse {
    pub overall: OverallStatus,
    pub qualities: std::collections::BTreeMap<String, QualitySnapshot>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[utoipa::path(
    get,
    path = "/videos",
    tag = "Videos",
    params(Pagination),
    responses(
        (status = 200, description = "Videos, newest first", body = PaginatedResponse<VideoResponse>)
    )
)]
pub async fn list_videos(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<VideoResponse>>, AppError> {
    let page = state
        .registry
        .list(pagination.page(), pagination.limit())
        .await?;
    tracing::debug!("Videos | GET /videos | count={} | res=200", page.total_items);
    Ok(Json(page.map(VideoResponse::from)))
}

#[utoipa::path(
    get,
    path = "/videos/{hash}",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Video metadata", body = VideoResponse),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn get_video(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    Ok(Json(state.registry.get(&hash).await?.into()))
}

#[utoipa::path(
    patch,
    path = "/videos/{hash}",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    request_body = UpdateVideoRequest,
    responses(
        (status = 200, description = "Metadata updated", body = VideoResponse),
        (status = 400, description = "Empty title"),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn update_video(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(payload): Json<UpdateVideoRequest>,
) -> Result<Json<VideoResponse>, AppError> {
    let updated = state
        .registry
        .update_metadata(
            &hash,
            MetadataUpdate {
                title: payload.title,
                description: payload.description,
            },
        )
        .await?;
    tracing::info!("Videos | PATCH /videos/{} | res=200", hash);
    Ok(Json(updated.into()))
}

#[utoipa::path(
    put,
    path = "/videos/{hash}/publish",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Video published", body = VideoResponse),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn publish_video(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    Ok(Json(state.registry.publish(&hash).await?.into()))
}

#[utoipa::path(
    put,
    path = "/videos/{hash}/unpublish",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Video back to draft", body = VideoResponse),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn unpublish_video(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    Ok(Json(state.registry.unpublish(&hash).await?.into()))
}

#[utoipa::path(
    put,
    path = "/videos/{hash}/schedule",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Publication scheduled", body = VideoResponse),
        (status = 400, description = "Time is not in the future"),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn schedule_video(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(payload): Json<ScheduleRequest>,
) -> Result<Json<VideoResponse>, AppError> {
    let updated = state.registry.schedule(&hash, payload.scheduled_at).await?;
    tracing::info!(
        "Videos | PUT /videos/{}/schedule | at={} | res=200",
        hash,
        payload.scheduled_at
    );
    Ok(Json(updated.into()))
}

#[utoipa::path(
    put,
    path = "/videos/{hash}/stop",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Job stopped", body = ControlResponse),
        (status = 404, description = "No job for this video"),
        (status = 412, description = "Job is not running")
    )
)]
pub async fn stop_transcode(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<ControlResponse>, AppError> {
    let job = state.orchestrator.stop(&hash).await?;
    tracing::info!("Videos | PUT /videos/{}/stop | res=200", hash);
    Ok(Json(ControlResponse {
        overall: job.overall,
        qualities: job.qualities,
    }))
}

#[utoipa::path(
    put,
    path = "/videos/{hash}/resume",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Job resumed", body = ControlResponse),
        (status = 412, description = "No stopped job for this video")
    )
)]
pub async fn resume_transcode(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<ControlResponse>, AppError> {
    let job = state.orchestrator.resume(&hash).await?;
    tracing::info!("Videos | PUT /videos/{}/resume | res=200", hash);
    // Resumed qualities may still be queued behind the fan-out limit; the
    // job as a whole is running again.
    let overall = match job.overall {
        OverallStatus::Pending => OverallStatus::Running,
        other => other,
    };
    Ok(Json(ControlResponse {
        overall,
        qualities: job.qualities,
    }))
}

#[utoipa::path(
    delete,
    path = "/videos/{hash}",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Video and renditions deleted", body = DeleteResponse),
        (status = 404, description = "Unknown video"),
        (status = 409, description = "A transcode job is active")
    )
)]
pub async fn delete_video(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.delete_video(&hash).await?;
    tracing::info!("Videos | DELETE /videos/{} | res=200", hash);
    Ok(Json(DeleteResponse { deleted: true }))
}

#[utoipa::path(
    post,
    path = "/videos/{hash}/thumbnail",
    tag = "Videos",
    params(("hash" = String, Path, description = "Asset content hash")),
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Field `file`: an image"),
    responses(
        (status = 200, description = "Thumbnail stored", body = VideoResponse),
        (status = 400, description = "Missing or invalid image"),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<VideoResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::InvalidArgument("Invalid multipart data".to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        if !content_type.starts_with("image/") {
            tracing::info!("Videos | POST /videos/{}/thumbnail | res=400 | File is not an image", hash);
            return Err(AppError::InvalidArgument("File is not an image".to_string()));
        }
        let data = field
            .bytes()
            .await
            .map_err(|_| AppError::InvalidArgument("Failed to read file bytes".to_string()))?;

        let updated = state.store_thumbnail(&hash, data.to_vec()).await?;
        tracing::info!("Videos | POST /videos/{}/thumbnail | res=200", hash);
        return Ok(Json(updated.into()));
    }

    Err(AppError::InvalidArgument("No file field found".to_string()))
}
