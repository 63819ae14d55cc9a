use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use backup_engine::BackupError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, msg) = match &self {
            AppError::Backup(e) => {
                let status = match e {
                    BackupError::NotFound(_) => StatusCode::NOT_FOUND,
                    BackupError::Integrity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    BackupError::Scheduler(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(kind = e.kind(), "Request failed: {e}");
                }
                (status, e.kind(), e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "Internal server error".into(),
                )
            }
        };
        (status, Json(json!({ "error": msg, "kind": kind }))).into_response()
    }
}
