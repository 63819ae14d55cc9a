use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::BackupRecord;
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/{filename}/verify", post(verify_backup))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub filename: String,
    pub valid: bool,
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackupRecord>>, AppError> {
    let service = state.service.clone();
    let records = tokio::task::spawn_blocking(move || service.list_backups())
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(records))
}

/// Runs a full cycle, queued behind any cycle already in flight
async fn create_backup(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<BackupRecord>), AppError> {
    let report = state.lifecycle.perform_immediate_backup().await?;
    Ok((StatusCode::CREATED, Json(report.record)))
}

async fn verify_backup(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Json<VerifyResponse>, AppError> {
    let service = state.service.clone();
    let name = filename.clone();
    let valid = tokio::task::spawn_blocking(move || service.verify(&name))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(VerifyResponse { filename, valid }))
}
