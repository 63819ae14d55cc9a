use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use backup_engine::{BackupRecord, BackupStatus};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub engine: BackupStatus,
    pub backup_count: usize,
    pub last_backup: Option<BackupRecord>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let engine = state.lifecycle.status().await;

    let service = state.service.clone();
    let records = tokio::task::spawn_blocking(move || service.list_backups())
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(StatusResponse {
        engine,
        backup_count: records.len(),
        last_backup: records.last().cloned(),
    }))
}
