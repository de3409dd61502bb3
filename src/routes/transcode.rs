use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::quality::Quality;
use crate::models::status::JobSnapshot;
use crate::state::AppState;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct TriggerRequest {
    /// Quality labels, e.g. `["360p", "720p"]`.
    pub qualities: Vec<String>,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct TriggerResponse {
    pub accepted: bool,
    #[serde(flatten)]
    pub job: JobSnapshot,
}

#[derive(Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub job: JobSnapshot,
    pub original_quality_label: Option<String>,
    pub original_resolution: Option<String>,
    /// Recommended delay before the next poll.
    pub poll_after_ms: u64,
}

#[utoipa::path(
    get,
    path = "/transcode/{hash}/status",
    tag = "Transcode",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Current job snapshot; empty and pending when no job ran", body = StatusResponse)
    )
)]
pub async fn status(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let job = state.orchestrator.status(&hash).await;
    let asset = state.registry.find(&hash).await?;

    Ok(Json(StatusResponse {
        job,
        original_resolution: asset.as_ref().and_then(|a| a.original_resolution()),
        original_quality_label: asset.and_then(|a| a.original_quality_label),
        poll_after_ms: state.config.poll_interval.as_millis() as u64,
    }))
}

#[utoipa::path(
    post,
    path = "/transcode/{hash}",
    tag = "Transcode",
    params(("hash" = String, Path, description = "Asset content hash")),
    request_body = TriggerRequest,
    responses(
        (status = 200, description = "Job accepted", body = TriggerResponse),
        (status = 400, description = "Empty or unknown quality list"),
        (status = 404, description = "Unknown video"),
        (status = 409, description = "A job is already running for this video")
    )
)]
pub async fn trigger(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(payload): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, AppError> {
    if payload.qualities.is_empty() {
        return Err(AppError::InvalidArgument("qualities must not be empty".to_string()));
    }
    let qualities = payload
        .qualities
        .iter()
        .map(|q| q.parse::<Quality>())
        .collect::<Result<Vec<_>, _>>()?;

    let job = state.trigger_transcode(&hash, &qualities).await?;
    tracing::info!(
        "Transcode | POST /transcode/{} | qualities={:?} | res=200",
        hash,
        payload.qualities
    );
    Ok(Json(TriggerResponse { accepted: true, job }))
}

/// Pushes a `status` event for every change of the job, ending once the
/// job is `ok` or `error`.
#[utoipa::path(
    get,
    path = "/transcode/{hash}/events",
    tag = "Transcode",
    params(("hash" = String, Path, description = "Asset content hash")),
    responses(
        (status = 200, description = "Server-sent `status` events carrying job snapshots", content_type = "text/event-stream"),
        (status = 404, description = "Unknown video")
    )
)]
pub async fn events(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.registry.get(&hash).await?;
    let mut rx = state.orchestrator.subscribe(&hash).await;

    let stream = async_stream::stream! {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            match Event::default().event("status").json_data(&snapshot) {
                Ok(event) => yield Ok(event),
                Err(e) => {
                    tracing::warn!(hash = %snapshot.asset_hash, "failed to encode status event: {}", e);
                    break;
                }
            }
            if snapshot.overall.is_terminal() || rx.changed().await.is_err() {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive")))
}
