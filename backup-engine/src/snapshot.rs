//! Point-in-time database export.
//!
//! Uses SQLite's online backup API so the copy is consistent even while the
//! application keeps writing. A raw file copy could capture a torn page.

use rusqlite::backup::{Backup, StepResult};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::utils::errors::{BackupError, Result};

/// Pages copied per backup step
const PAGES_PER_STEP: i32 = 256;

/// Back-off when the source is busy or locked
const BUSY_PAUSE: Duration = Duration::from_millis(10);

/// Produces a self-consistent copy of a live database.
pub trait SnapshotProducer: Send + Sync {
    /// Write a snapshot of `source` to `dest`. On error the caller must treat
    /// `dest` as garbage.
    fn snapshot(&self, source: &Path, dest: &Path) -> Result<()>;
}

/// SQLite snapshot producer bounded by a timeout.
#[derive(Debug, Clone)]
pub struct SqliteSnapshot {
    timeout: Duration,
}

impl SqliteSnapshot {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn engine_error(context: &str, err: rusqlite::Error) -> BackupError {
    BackupError::Snapshot(format!("{}: {}", context, err))
}

impl SnapshotProducer for SqliteSnapshot {
    fn snapshot(&self, source: &Path, dest: &Path) -> Result<()> {
        if !source.is_file() {
            return Err(BackupError::Snapshot(format!(
                "source database not found: {}",
                source.display()
            )));
        }

        let src = Connection::open_with_flags(
            source,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| engine_error("failed to open source database", e))?;
        let mut dst =
            Connection::open(dest).map_err(|e| engine_error("failed to open snapshot file", e))?;

        let started = Instant::now();
        let mut steps = 0u64;
        {
            let backup =
                Backup::new(&src, &mut dst).map_err(|e| engine_error("failed to start backup", e))?;

            loop {
                steps += 1;
                match backup
                    .step(PAGES_PER_STEP)
                    .map_err(|e| engine_error("backup step failed", e))?
                {
                    StepResult::Done => break,
                    StepResult::More => {}
                    _ => std::thread::sleep(BUSY_PAUSE),
                }

                if started.elapsed() > self.timeout {
                    return Err(BackupError::Snapshot(format!(
                        "snapshot timed out after {:?}",
                        self.timeout
                    )));
                }
            }
        }

        dst.close()
            .map_err(|(_, e)| engine_error("failed to close snapshot file", e))?;

        debug!(
            source = %source.display(),
            steps,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Snapshot complete"
        );
        Ok(())
    }
}
