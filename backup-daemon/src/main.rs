mod error;
mod routes;
mod state;

use crate::state::AppState;
use backup_engine::daemon::ShutdownCoordinator;
use backup_engine::utils::logger;
use backup_engine::{BackupLifecycle, BackupScheduler, BackupService, EngineConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "backup-daemon")]
#[command(about = "Scheduled encrypted database backups", long_about = None)]
struct Args {
    /// Log level (overrides LOG_LEVEL)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until SIGINT/SIGTERM (default)
    Serve,
    /// Run one backup cycle now and exit
    Backup,
    /// Print the backup ledger as JSON
    List,
    /// Decrypt and checksum a backup without restoring it
    Verify { filename: String },
    /// Restore a backup over the database (or --target)
    Restore {
        filename: String,
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Remove orphan artifacts and report ledger entries with missing files
    Reconcile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = EngineConfig::from_env()?;
    logger::init(args.log_level.as_deref().unwrap_or(&config.log_level))?;

    let service = Arc::new(BackupService::new(config.backup.clone())?);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, service).await,
        Command::Backup => {
            let scheduler = BackupScheduler::new(service, config.schedule)?;
            let report = scheduler.perform_immediate_backup().await?;
            println!("{}", serde_json::to_string_pretty(&report.record)?);
            Ok(())
        }
        Command::List => {
            let records = blocking(service, |s| s.list_backups()).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Command::Verify { filename } => {
            let name = filename.clone();
            if blocking(service, move |s| s.verify(&name)).await? {
                println!("{}: OK", filename);
                Ok(())
            } else {
                anyhow::bail!("{}: verification failed", filename)
            }
        }
        Command::Restore { filename, target } => {
            let target = target.unwrap_or_else(|| config.backup.database_path.clone());
            let shown = target.display().to_string();
            let name = filename.clone();
            blocking(service, move |s| s.restore(&name, &target)).await?;
            println!("{} restored to {}", filename, shown);
            Ok(())
        }
        Command::Reconcile => {
            let report = blocking(service, |s| {
                let _cycle = s.store().lock_cycle()?;
                s.reconcile()
            })
            .await?;
            for name in &report.orphans_removed {
                println!("removed orphan {}", name);
            }
            for name in &report.stale_plaintext_removed {
                println!("removed stale plaintext {}", name);
            }
            for name in &report.dangling {
                println!("missing artifact {}", name);
            }
            Ok(())
        }
    }
}

async fn serve(config: EngineConfig, service: Arc<BackupService>) -> anyhow::Result<()> {
    tracing::info!(
        database = %config.backup.database_path.display(),
        backup_dir = %config.backup.backup_dir.display(),
        schedule = %config.schedule.cron,
        "Starting backup daemon"
    );

    let lifecycle = Arc::new(BackupLifecycle::new());
    lifecycle
        .initialize_with_service(service.clone(), config.schedule.clone())
        .await?;

    let coordinator = ShutdownCoordinator::new();
    let cancel = CancellationToken::new();

    let server = match config.status_port {
        Some(port) => {
            let state = Arc::new(AppState::new(lifecycle.clone(), service));
            let app = routes::create_router(state);

            let addr = format!("0.0.0.0:{}", port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!("Status server listening on {}", addr);

            let token = cancel.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    coordinator.wait_for_signal().await;
    cancel.cancel();

    if let Some(handle) = server {
        match handle.await {
            Ok(Err(e)) => tracing::warn!("Status server error: {}", e),
            Err(e) => tracing::warn!("Status server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    coordinator.shutdown(&lifecycle).await;
    tracing::info!("Backup daemon stopped");
    Ok(())
}

/// Run a blocking service call off the async runtime
async fn blocking<T, F>(service: Arc<BackupService>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&BackupService) -> backup_engine::Result<T> + Send + 'static,
{
    let value = tokio::task::spawn_blocking(move || f(&service)).await??;
    Ok(value)
}
