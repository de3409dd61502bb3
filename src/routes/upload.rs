use axum::{
    extract::{Multipart, Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::upload::UploadProgress;
use crate::state::AppState;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct InitUploadRequest {
    pub filename: String,
    pub total_chunks: i64,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct InitUploadResponse {
    pub upload_id: Uuid,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ChunkAck {
    pub ack: bool,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct CompleteUploadRequest {
    pub upload_id: Uuid,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CompleteUploadResponse {
    pub hash: String,
    pub filename: String,
    pub size_bytes: i64,
    pub original_resolution: Option<String>,
    pub original_quality_label: Option<String>,
}

#[utoipa::path(
    post,
    path = "/upload/init",
    tag = "Upload",
    request_body = InitUploadRequest,
    responses(
        (status = 200, description = "Upload session created", body = InitUploadResponse),
        (status = 400, description = "Invalid filename or chunk count")
    )
)]
pub async fn init_upload(
    State(state): State<AppState>,
    Json(payload): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, AppError> {
    let upload_id = state
        .uploads
        .init(&payload.filename, payload.total_chunks)
        .await?;
    tracing::info!(
        "Upload | POST /upload/init | upload_id={} | chunks={} | res=200",
        upload_id,
        payload.total_chunks
    );
    Ok(Json(InitUploadResponse { upload_id }))
}

#[utoipa::path(
    post,
    path = "/upload/chunk",
    tag = "Upload",
    request_body(content = Vec<u8>, content_type = "multipart/form-data",
        description = "Fields: `upload_id`, `index`, `file`"),
    responses(
        (status = 200, description = "Chunk stored", body = ChunkAck),
        (status = 400, description = "Missing field or index out of range"),
        (status = 404, description = "Unknown or expired upload"),
        (status = 409, description = "Upload is being completed")
    )
)]
pub async fn put_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkAck>, AppError> {
    let mut upload_id: Option<Uuid> = None;
    let mut index: Option<i64> = None;
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidArgument(format!("Invalid multipart data: {}", e)))?
    {
        match field.name() {
            Some("upload_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| AppError::InvalidArgument("Unreadable upload_id".to_string()))?;
                upload_id = Some(raw.trim().parse().map_err(|_| {
                    AppError::InvalidArgument(format!("Invalid upload_id '{}'", raw))
                })?);
            }
            Some("index") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|_| AppError::InvalidArgument("Unreadable index".to_string()))?;
                index = Some(raw.trim().parse().map_err(|_| {
                    AppError::InvalidArgument(format!("Invalid chunk index '{}'", raw))
                })?);
            }
            Some("file") => {
                data = Some(field.bytes().await.map_err(|e| {
                    AppError::InvalidArgument(format!("Failed to read chunk bytes: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let (Some(upload_id), Some(index), Some(data)) = (upload_id, index, data) else {
        return Err(AppError::InvalidArgument(
            "Multipart body must contain upload_id, index and file".to_string(),
        ));
    };

    state.uploads.put_chunk(upload_id, index, &data).await?;
    tracing::debug!(
        "Upload | POST /upload/chunk | upload_id={} | index={} | size={} | res=200",
        upload_id,
        index,
        data.len()
    );
    Ok(Json(ChunkAck { ack: true }))
}

#[utoipa::path(
    post,
    path = "/upload/complete",
    tag = "Upload",
    request_body = CompleteUploadRequest,
    responses(
        (status = 200, description = "Upload assembled and registered", body = CompleteUploadResponse),
        (status = 404, description = "Unknown or expired upload"),
        (status = 409, description = "Completion already in progress"),
        (status = 412, description = "Chunks missing; body lists `missing_indices`")
    )
)]
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(payload): Json<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    let asset = state.finish_upload(payload.upload_id).await?;
    tracing::info!(
        "Upload | POST /upload/complete | upload_id={} | hash={} | res=200",
        payload.upload_id,
        asset.hash
    );
    Ok(Json(CompleteUploadResponse {
        original_resolution: asset.original_resolution(),
        hash: asset.hash,
        filename: asset.filename,
        size_bytes: asset.size_bytes,
        original_quality_label: asset.original_quality_label,
    }))
}

#[utoipa::path(
    get,
    path = "/upload/{upload_id}",
    tag = "Upload",
    params(("upload_id" = Uuid, Path, description = "Upload session id")),
    responses(
        (status = 200, description = "Received and missing chunk indices", body = UploadProgress),
        (status = 404, description = "Unknown or expired upload")
    )
)]
pub async fn upload_progress(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Result<Json<UploadProgress>, AppError> {
    Ok(Json(state.uploads.progress(upload_id).await?))
}
