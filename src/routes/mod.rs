mod home;
pub mod transcode;
pub mod upload;
pub mod videos;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

/// Slack on top of the chunk size for multipart framing and the other fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        home::root,
        upload::init_upload,
        upload::put_chunk,
        upload::complete_upload,
        upload::upload_progress,
        transcode::trigger,
        transcode::status,
        transcode::events,
        videos::list_videos,
        videos::get_video,
        videos::update_video,
        videos::publish_video,
        videos::unpublish_video,
        videos::schedule_video,
        videos::stop_transcode,
        videos::resume_transcode,
        videos::delete_video,
        videos::upload_thumbnail,
    ),
    components(
        schemas(
            upload::InitUploadRequest,
            upload::InitUploadResponse,
            upload::ChunkAck,
            upload::CompleteUploadRequest,
            upload::CompleteUploadResponse,
            crate::services::upload::UploadProgress,
            transcode::TriggerRequest,
            transcode::TriggerResponse,
            transcode::StatusResponse,
            crate::models::status::JobSnapshot,
            crate::models::status::QualitySnapshot,
            crate::models::status::QualityStatus,
            crate::models::status::OverallStatus,
            videos::VideoResponse,
            videos::UpdateVideoRequest,
            videos::ScheduleRequest,
            videos::ControlResponse,
            videos::DeleteResponse,
            crate::entities::asset::AssetStatus,
        )
    ),
    tags(
        (name = "General", description = "General API information"),
        (name = "Upload", description = "Chunked, resumable uploads"),
        (name = "Transcode", description = "Trigger transcodes and follow their progress"),
        (name = "Videos", description = "Video metadata, publication and job control")
    ),
    info(
        title = "MediaTranscodeKit API",
        version = "0.1.0",
        description = "Chunked video upload coordination and multi-quality transcode orchestration",
    )
)]
pub struct ApiDoc;

pub fn create_routes(state: AppState) -> Router {
    let swagger_router: Router = SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into();

    let body_limit = state.config.max_chunk_bytes + MULTIPART_OVERHEAD;

    let upload_routes = Router::new()
        .route("/upload/init", post(upload::init_upload))
        .route("/upload/chunk", post(upload::put_chunk))
        .route("/upload/complete", post(upload::complete_upload))
        .route("/upload/{upload_id}", get(upload::upload_progress));

    let transcode_routes = Router::new()
        .route("/transcode/{hash}", post(transcode::trigger))
        .route("/transcode/{hash}/status", get(transcode::status))
        .route("/transcode/{hash}/events", get(transcode::events));

    let video_routes = Router::new()
        .route("/videos", get(videos::list_videos))
        .route(
            "/videos/{hash}",
            get(videos::get_video)
                .patch(videos::update_video)
                .delete(videos::delete_video),
        )
        .route("/videos/{hash}/publish", put(videos::publish_video))
        .route("/videos/{hash}/unpublish", put(videos::unpublish_video))
        .route("/videos/{hash}/schedule", put(videos::schedule_video))
        .route("/videos/{hash}/stop", put(videos::stop_transcode))
        .route("/videos/{hash}/resume", put(videos::resume_transcode))
        .route("/videos/{hash}/thumbnail", post(videos::upload_thumbnail));

    let app_routes = Router::new()
        .route("/", get(home::root))
        .merge(upload_routes)
        .merge(transcode_routes)
        .merge(video_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    Router::new()
        .merge(swagger_router)
        .merge(app_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
