pub mod backups;
pub mod status;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(status::router())
        .nest("/backups", backups::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::state::AppState;
    use axum::response::Response;
    use backup_engine::crypto::EncryptionKey;
    use backup_engine::{BackupConfig, BackupLifecycle, BackupService};
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Arc;

    /// State over a small real SQLite database; the lifecycle is left uninitialized.
    pub(crate) fn seeded_state(dir: &Path) -> Arc<AppState> {
        let db = dir.join("app.db");
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE leads (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO leads (name) VALUES ('alpha'), ('beta'), ('gamma');",
        )
        .unwrap();
        drop(conn);

        let key = EncryptionKey::from_material("route-test-key").unwrap();
        let config = BackupConfig::new(db, dir.join("backups"), key);
        let service = Arc::new(BackupService::new(config).unwrap());
        Arc::new(AppState::new(Arc::new(BackupLifecycle::new()), service))
    }

    pub(crate) async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
