use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("chunk index {index} is outside [0, {total})")]
    OutOfRange { index: i64, total: u32 },
    #[error("{message}")]
    FailedPrecondition { message: String, missing: Vec<u32> },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
    #[error("database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn precondition(message: impl Into<String>) -> Self {
        AppError::FailedPrecondition {
            message: message.into(),
            missing: Vec::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidArgument(_) | AppError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::FailedPrecondition { .. } => StatusCode::PRECONDITION_FAILED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) | AppError::DatabaseError(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::NotFound(_) => "not_found",
            AppError::OutOfRange { .. } => "out_of_range",
            AppError::FailedPrecondition { .. } => "failed_precondition",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) | AppError::DatabaseError(_) | AppError::Io(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        let body = match &self {
            AppError::Internal(_) | AppError::DatabaseError(_) | AppError::Io(_) => {
                tracing::error!(error = %self, "request failed");
                json!({ "error": "Internal server error", "code": code })
            }
            AppError::FailedPrecondition { message, missing } if !missing.is_empty() => json!({
                "error": message,
                "code": code,
                "missing_indices": missing,
            }),
            _ => json!({ "error": self.to_string(), "code": code }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn missing_indices_are_reported() {
        let (status, body) = body_json(AppError::FailedPrecondition {
            message: "upload is missing 1 chunk(s)".to_string(),
            missing: vec![2],
        })
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["code"], "failed_precondition");
        assert_eq!(body["missing_indices"], json!([2]));
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) = body_json(AppError::Internal("disk on fire".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let (status, body) = body_json(AppError::Conflict("busy".to_string())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "busy");
    }
}
