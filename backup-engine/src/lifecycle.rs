//! Start/stop handle for the backup scheduler.
//!
//! Owned by whoever runs the process and passed where it is needed; there is
//! no global instance. Holds at most one live scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{BackupConfig, ScheduleConfig};
use crate::scheduler::{BackupScheduler, CycleReport};
use crate::service::BackupService;
use crate::utils::errors::{BackupError, Result};

/// How long `shutdown` waits for an in-flight cycle
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    pub initialized: bool,
    pub is_running: bool,
    pub schedule: String,
    pub next_run_time: Option<DateTime<Utc>>,
}

pub struct BackupLifecycle {
    scheduler: Mutex<Option<Arc<BackupScheduler>>>,
    shutdown_grace: Duration,
}

impl BackupLifecycle {
    pub fn new() -> Self {
        Self::with_shutdown_grace(DEFAULT_SHUTDOWN_GRACE)
    }

    pub fn with_shutdown_grace(shutdown_grace: Duration) -> Self {
        Self {
            scheduler: Mutex::new(None),
            shutdown_grace,
        }
    }

    /// Build the service and start the scheduler. No-op if already initialized.
    pub async fn initialize(&self, backup: BackupConfig, schedule: ScheduleConfig) -> Result<()> {
        let service = BackupService::new(backup)?;
        self.initialize_with_service(Arc::new(service), schedule).await
    }

    pub async fn initialize_with_service(
        &self,
        service: Arc<BackupService>,
        schedule: ScheduleConfig,
    ) -> Result<()> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            warn!("Backup engine already initialized");
            return Ok(());
        }

        let scheduler = Arc::new(BackupScheduler::new(service, schedule)?);
        scheduler.start().await?;
        *slot = Some(scheduler);
        info!("Backup engine initialized");
        Ok(())
    }

    /// Stop scheduling and wait, up to the grace period, for a running cycle.
    ///
    /// Returning after the grace period does not cancel the cycle: its
    /// blocking task keeps running and the runtime waits for it on drop, so
    /// process exit is delayed rather than cut short.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(scheduler) = self.scheduler.lock().await.take() else {
            return Ok(());
        };

        scheduler.stop().await?;
        if tokio::time::timeout(self.shutdown_grace, scheduler.wait_for_idle())
            .await
            .is_err()
        {
            warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Backup cycle still running after shutdown grace; it will finish in the background"
            );
        }
        info!("Backup engine shut down");
        Ok(())
    }

    pub async fn status(&self) -> BackupStatus {
        let Some(scheduler) = self.scheduler().await else {
            return BackupStatus {
                initialized: false,
                is_running: false,
                schedule: String::new(),
                next_run_time: None,
            };
        };

        BackupStatus {
            initialized: true,
            is_running: scheduler.is_running().await,
            schedule: scheduler.schedule().to_string(),
            next_run_time: scheduler.next_run_time().await,
        }
    }

    pub async fn scheduler(&self) -> Option<Arc<BackupScheduler>> {
        self.scheduler.lock().await.clone()
    }

    pub async fn perform_immediate_backup(&self) -> Result<CycleReport> {
        let scheduler = self
            .scheduler()
            .await
            .ok_or_else(|| BackupError::Scheduler("backup engine not initialized".into()))?;
        scheduler.perform_immediate_backup().await
    }
}

impl Default for BackupLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
