//! Cron-driven backup cycles.
//!
//! A cycle is create -> retention -> (health check) -> capacity -> reconcile,
//! followed by one notification. Cycles never overlap: a scheduled tick that
//! finds one in flight is skipped, a manual trigger waits its turn.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ScheduleConfig;
use crate::notify::{BackupNotification, Notifier};
use crate::service::BackupService;
use crate::store::BackupRecord;
use crate::utils::errors::{BackupError, Result};

/// What one successful cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub record: BackupRecord,
    pub retention_removed: Vec<BackupRecord>,
    pub capacity_removed: Vec<BackupRecord>,
    pub verified: bool,
    pub duration: Duration,
}

/// Accept five-field cron by prepending a seconds field.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(BackupError::Scheduler(format!(
            "cron expression {:?} has {} fields, expected 5 to 7",
            expr, n
        ))),
    }
}

#[derive(Clone)]
struct CycleRunner {
    service: Arc<BackupService>,
    notifier: Notifier,
    health_check: bool,
    cycle_lock: Arc<Mutex<()>>,
}

impl CycleRunner {
    /// Wait for any running cycle, then run.
    async fn run_queued(&self) -> Result<CycleReport> {
        let _guard = self.cycle_lock.lock().await;
        self.run_locked().await
    }

    /// Run only if nothing is in flight.
    async fn run_if_idle(&self) -> Option<Result<CycleReport>> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!("Skipping scheduled backup: a cycle is already running");
            return None;
        };
        Some(self.run_locked().await)
    }

    async fn run_locked(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let service = self.service.clone();
        let health_check = self.health_check;

        let result = tokio::task::spawn_blocking(move || run_cycle(&service, health_check))
            .await
            .unwrap_or_else(|e| Err(BackupError::Storage(format!("backup task failed: {}", e))));

        let duration = started.elapsed();
        match result {
            Ok(mut report) => {
                report.duration = duration;
                self.notifier
                    .notify(BackupNotification::success(&report.record, duration))
                    .await;
                Ok(report)
            }
            Err(e) => {
                self.notifier
                    .notify(BackupNotification::failure(&e, duration))
                    .await;
                Err(e)
            }
        }
    }
}

/// With health checks on, the newest older backup survives age retention
/// until the new artifact verifies; only then is it expired as well.
fn run_cycle(service: &BackupService, health_check: bool) -> Result<CycleReport> {
    let _cycle = service.store().lock_cycle()?;
    let record = service.create_backup()?;

    let mut retention_removed = if health_check {
        let fallback = service
            .list_backups()?
            .into_iter()
            .rev()
            .find(|r| r.filename != record.filename)
            .map(|r| r.filename);
        service.apply_retention_sparing(fallback.as_deref())?
    } else {
        service.apply_retention()?
    };

    if health_check {
        if !service.verify(&record.filename)? {
            return Err(BackupError::integrity(
                &record.filename,
                "verification of the new backup failed",
            ));
        }
        retention_removed.extend(service.apply_retention()?);
    }

    let capacity_removed = service.enforce_capacity()?;

    if let Err(e) = service.reconcile() {
        warn!(error = %e, "Backup directory reconciliation failed");
    }

    Ok(CycleReport {
        record,
        retention_removed,
        capacity_removed,
        verified: health_check,
        duration: Duration::ZERO,
    })
}

struct RunningSchedule {
    scheduler: JobScheduler,
    job_id: Uuid,
}

pub struct BackupScheduler {
    runner: CycleRunner,
    schedule: ScheduleConfig,
    cron: String,
    running: Mutex<Option<RunningSchedule>>,
}

impl BackupScheduler {
    pub fn new(service: Arc<BackupService>, schedule: ScheduleConfig) -> Result<Self> {
        let cron = normalize_cron(&schedule.cron)?;
        let notifier = Notifier::new(schedule.notification_url.clone())?;
        Ok(Self {
            runner: CycleRunner {
                service,
                notifier,
                health_check: schedule.health_check,
                cycle_lock: Arc::new(Mutex::new(())),
            },
            schedule,
            cron,
            running: Mutex::new(None),
        })
    }

    pub fn service(&self) -> &Arc<BackupService> {
        &self.runner.service
    }

    pub fn notifier(&self) -> &Notifier {
        &self.runner.notifier
    }

    /// The cron expression as configured
    pub fn schedule(&self) -> &str {
        &self.schedule.cron
    }

    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Backup scheduler already running");
            return Ok(());
        }

        let scheduler = JobScheduler::new().await?;
        let runner = self.runner.clone();
        let job = Job::new_async(self.cron.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                info!("Starting scheduled backup");
                // Outcome already reported through the notifier.
                let _ = runner.run_if_idle().await;
            })
        })?;

        let job_id = scheduler.add(job).await?;
        scheduler.start().await?;

        info!(cron = %self.cron, "Backup scheduler started");
        *running = Some(RunningSchedule { scheduler, job_id });
        Ok(())
    }

    /// Stop future cycles. A cycle already running is not interrupted.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut schedule) = self.running.lock().await.take() else {
            return Ok(());
        };
        schedule.scheduler.shutdown().await?;
        info!("Backup scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn next_run_time(&self) -> Option<DateTime<Utc>> {
        let mut running = self.running.lock().await;
        let schedule = running.as_mut()?;
        match schedule.scheduler.next_tick_for_job(schedule.job_id).await {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, "Failed to query next backup time");
                None
            }
        }
    }

    /// Run a full cycle now, queued behind any cycle in flight.
    pub async fn perform_immediate_backup(&self) -> Result<CycleReport> {
        info!("Starting immediate backup");
        self.runner.run_queued().await
    }

    pub fn is_cycle_in_progress(&self) -> bool {
        self.runner.cycle_lock.try_lock().is_err()
    }

    /// Resolves once no cycle is running.
    pub async fn wait_for_idle(&self) {
        let _guard = self.runner.cycle_lock.lock().await;
    }
}
