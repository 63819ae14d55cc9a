use backup_engine::{BackupLifecycle, BackupService};
use std::sync::Arc;

pub struct AppState {
    pub lifecycle: Arc<BackupLifecycle>,
    pub service: Arc<BackupService>,
}

impl AppState {
    pub fn new(lifecycle: Arc<BackupLifecycle>, service: Arc<BackupService>) -> Self {
        Self { lifecycle, service }
    }
}
