//! On-disk backup directory: encrypted artifacts plus the JSON ledger.
//!
//! Layout:
//!
//! ```text
//! <backup_dir>/
//!   backup-metadata.json        ledger (array of BackupRecord)
//!   .backup-ledger.lock         advisory lock for ledger writes
//!   .backup-cycle.lock          advisory lock held for a whole cycle
//!   database-backup-<ts>.backup.enc
//!   .snapshot-*                 plaintext staged during a backup (transient)
//! ```
//!
//! Ledger writes go to a temp file that is renamed over the ledger, so readers
//! see either the old or the new ledger, never a partial one. Every
//! read-modify-write holds both the in-process mutex and the file lock.

pub mod lock;
pub mod record;

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::utils::errors::{BackupError, Result};
use lock::FileLock;
pub use record::{artifact_filename, is_artifact_name, validate_filename, BackupRecord};

pub const LEDGER_FILE: &str = "backup-metadata.json";
const LOCK_FILE: &str = ".backup-ledger.lock";
const CYCLE_LOCK_FILE: &str = ".backup-cycle.lock";

/// Temp-file prefixes for plaintext staged by a backup or a restore
pub const SNAPSHOT_PREFIX: &str = ".snapshot-";
pub const RESTORE_PREFIX: &str = ".restore-";

/// Outcome of a reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Artifacts on disk with no ledger entry that were deleted
    pub orphans_removed: Vec<String>,
    /// Ledger entries whose artifact is missing. Left in place for an operator.
    pub dangling: Vec<String>,
    /// Plaintext temp files left behind by an interrupted backup or restore
    pub stale_plaintext_removed: Vec<String>,
}

pub struct BackupStore {
    dir: PathBuf,
    ledger_path: PathBuf,
    lock_path: PathBuf,
    write_guard: Mutex<()>,
}

impl BackupStore {
    /// Open (and create if needed) a backup directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            BackupError::Storage(format!("failed to create {}: {}", dir.display(), e))
        })?;

        Ok(Self {
            ledger_path: dir.join(LEDGER_FILE),
            lock_path: dir.join(LOCK_FILE),
            dir,
            write_guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Block until no other process is running a backup cycle against this
    /// directory. Not reentrant: taking it twice in one process deadlocks.
    pub fn lock_cycle(&self) -> Result<FileLock> {
        FileLock::acquire(&self.dir.join(CYCLE_LOCK_FILE))
    }

    /// Write an artifact under its timestamp-derived name. Never overwrites.
    pub fn persist(&self, timestamp: DateTime<Utc>, data: &[u8]) -> Result<String> {
        let filename = artifact_filename(timestamp);
        let path = self.artifact_path(&filename);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    BackupError::Storage(format!("artifact name collision: {}", filename))
                }
                _ => BackupError::Storage(format!("failed to create {}: {}", filename, e)),
            })?;

        if let Err(e) = file.write_all(data).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(BackupError::Storage(format!("failed to write {}: {}", filename, e)));
        }

        debug!(filename = %filename, bytes = data.len(), "Artifact persisted");
        Ok(filename)
    }

    pub fn read_artifact(&self, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;
        fs::read(self.artifact_path(filename)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BackupError::NotFound(filename.to_string()),
            _ => BackupError::Storage(format!("failed to read {}: {}", filename, e)),
        })
    }

    /// Delete an artifact that never made it into the ledger
    pub fn discard_artifact(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        remove_if_present(&self.artifact_path(filename))?;
        Ok(())
    }

    /// Records ordered oldest first. Lock-free: ledger writes are atomic renames.
    pub fn list_records(&self) -> Result<Vec<BackupRecord>> {
        load_ledger(&self.ledger_path)
    }

    pub fn find_record(&self, filename: &str) -> Result<BackupRecord> {
        validate_filename(filename)?;
        self.list_records()?
            .into_iter()
            .find(|r| r.filename == filename)
            .ok_or_else(|| BackupError::NotFound(filename.to_string()))
    }

    pub fn append_record(&self, record: BackupRecord) -> Result<()> {
        validate_filename(&record.filename)?;
        self.mutate_ledger(|records| {
            if records.iter().any(|r| r.filename == record.filename) {
                return Err(BackupError::Storage(format!(
                    "duplicate ledger entry: {}",
                    record.filename
                )));
            }
            records.push(record);
            Ok(((), true))
        })
    }

    /// Delete the artifact, then the ledger entry.
    ///
    /// A crash between the two leaves an entry whose file is already gone;
    /// repeating the call finishes the job. An already-missing file is not an
    /// error.
    pub fn remove_record(&self, filename: &str) -> Result<BackupRecord> {
        validate_filename(filename)?;
        self.mutate_ledger(|records| {
            let idx = records
                .iter()
                .position(|r| r.filename == filename)
                .ok_or_else(|| BackupError::NotFound(filename.to_string()))?;

            remove_if_present(&self.artifact_path(filename))?;
            let removed = records.remove(idx);
            info!(filename = %filename, "Backup removed");
            Ok((removed, true))
        })
    }

    /// Delete orphan artifacts older than `grace` and report dangling entries.
    pub fn reconcile(&self, grace: Duration) -> Result<ReconcileReport> {
        self.mutate_ledger(|records| {
            let mut report = ReconcileReport::default();

            for entry in fs::read_dir(&self.dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if is_plaintext_leftover(&name) {
                    if older_than(&entry.path(), grace) {
                        match fs::remove_file(entry.path()) {
                            Ok(()) => {
                                warn!(file = %name, "Removed plaintext left by an interrupted cycle");
                                report.stale_plaintext_removed.push(name);
                            }
                            Err(e) => warn!(file = %name, error = %e, "Failed to remove stale plaintext"),
                        }
                    }
                    continue;
                }
                if !is_artifact_name(&name) || records.iter().any(|r| r.filename == name) {
                    continue;
                }
                if !older_than(&entry.path(), grace) {
                    continue;
                }
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        warn!(filename = %name, "Removed orphan artifact with no ledger entry");
                        report.orphans_removed.push(name);
                    }
                    Err(e) => warn!(filename = %name, error = %e, "Failed to remove orphan artifact"),
                }
            }

            for record in records.iter() {
                if !self.artifact_path(&record.filename).exists() {
                    error!(
                        filename = %record.filename,
                        "Ledger entry references a missing artifact; operator action required"
                    );
                    report.dangling.push(record.filename.clone());
                }
            }

            Ok((report, false))
        })
    }

    /// Run `f` against the ledger under both locks. `f` returns whether the
    /// ledger changed and must be written back.
    fn mutate_ledger<T>(
        &self,
        f: impl FnOnce(&mut Vec<BackupRecord>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let _lock = FileLock::acquire(&self.lock_path)?;

        let mut records = load_ledger(&self.ledger_path)?;
        let (out, dirty) = f(&mut records)?;
        if dirty {
            records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            save_ledger(&self.dir, &self.ledger_path, &records)?;
        }
        Ok(out)
    }
}

fn load_ledger(path: &Path) -> Result<Vec<BackupRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackupError::Storage(format!("failed to read ledger: {}", e))),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut records: Vec<BackupRecord> = serde_json::from_str(&content)?;
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(records)
}

fn save_ledger(dir: &Path, path: &Path, records: &[BackupRecord]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, records)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        BackupError::Storage(format!("failed to replace ledger: {}", e.error))
    })?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackupError::Storage(format!(
            "failed to delete {}: {}",
            path.display(),
            e
        ))),
    }
}

fn is_plaintext_leftover(name: &str) -> bool {
    name.starts_with(SNAPSHOT_PREFIX) || name.starts_with(RESTORE_PREFIX)
}

fn older_than(path: &Path, grace: Duration) -> bool {
    if grace.is_zero() {
        return true;
    }
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age >= grace)
}
