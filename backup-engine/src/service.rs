//! Backup orchestration: one backup, one restore, one verification.
//!
//! A backup walks through fixed stages:
//!
//! ```text
//! Snapshotting -> Checksumming -> Compressing -> Encrypting -> Persisting -> MetadataUpdate
//! ```
//!
//! Each stage either completes or aborts the backup. The plaintext snapshot is
//! a scoped temp file and disappears on every exit path; an artifact whose
//! ledger entry could not be written is deleted again.

use chrono::{SubsecRound, Utc};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::crypto::{checksum_file, compute_checksum, decrypt, encrypt};
use crate::retention;
use crate::snapshot::{SnapshotProducer, SqliteSnapshot};
use crate::store::{BackupRecord, BackupStore, ReconcileReport, RESTORE_PREFIX, SNAPSHOT_PREFIX};
use crate::utils::errors::{BackupError, Result};

const COMPRESSION_LEVEL: i32 = 3;

/// Orphans younger than this may belong to a backup still in flight
const ORPHAN_GRACE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    Snapshotting,
    Checksumming,
    Compressing,
    Encrypting,
    Persisting,
    MetadataUpdate,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Snapshotting => "snapshotting",
            Self::Checksumming => "checksumming",
            Self::Compressing => "compressing",
            Self::Encrypting => "encrypting",
            Self::Persisting => "persisting",
            Self::MetadataUpdate => "metadata-update",
        };
        f.write_str(name)
    }
}

pub struct BackupService {
    config: BackupConfig,
    store: BackupStore,
    snapshotter: Box<dyn SnapshotProducer>,
}

impl BackupService {
    /// Service backed by the SQLite snapshot producer
    pub fn new(config: BackupConfig) -> Result<Self> {
        let snapshotter = Box::new(SqliteSnapshot::new(config.step_timeout));
        Self::with_snapshotter(config, snapshotter)
    }

    pub fn with_snapshotter(
        config: BackupConfig,
        snapshotter: Box<dyn SnapshotProducer>,
    ) -> Result<Self> {
        let store = BackupStore::open(&config.backup_dir)?;
        Ok(Self {
            config,
            store,
            snapshotter,
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    /// Snapshot, checksum, encrypt and record one backup.
    pub fn create_backup(&self) -> Result<BackupRecord> {
        let started = Instant::now();
        let timestamp = Utc::now().trunc_subsecs(3);

        let snapshot = tempfile::Builder::new()
            .prefix(SNAPSHOT_PREFIX)
            .suffix(".db")
            .tempfile_in(self.store.dir())?;

        self.run_stage(BackupStage::Snapshotting, || {
            self.snapshotter
                .snapshot(&self.config.database_path, snapshot.path())
        })?;

        let (plaintext, checksum) = self.run_stage(BackupStage::Checksumming, || {
            let bytes = fs::read(snapshot.path())?;
            let checksum = compute_checksum(&bytes);
            Ok((bytes, checksum))
        })?;
        let plaintext_len = plaintext.len();

        let payload = if self.config.compression {
            self.run_stage(BackupStage::Compressing, || {
                zstd::encode_all(plaintext.as_slice(), COMPRESSION_LEVEL)
                    .map_err(|e| BackupError::Storage(format!("compression failed: {}", e)))
            })?
        } else {
            plaintext
        };

        let artifact = self.run_stage(BackupStage::Encrypting, || {
            encrypt(&payload, &self.config.encryption_key)
        })?;
        drop(payload);

        if let Err(e) = snapshot.close() {
            warn!(error = %e, "Failed to remove plaintext snapshot");
        }

        let filename = self.run_stage(BackupStage::Persisting, || {
            self.store.persist(timestamp, &artifact)
        })?;

        let record = BackupRecord {
            timestamp,
            filename,
            size_bytes: artifact.len() as u64,
            checksum,
            encrypted: true,
            compressed: self.config.compression,
        };

        let appended = self.run_stage(BackupStage::MetadataUpdate, || {
            self.store.append_record(record.clone())
        });
        if let Err(e) = appended {
            if let Err(cleanup) = self.store.discard_artifact(&record.filename) {
                warn!(filename = %record.filename, error = %cleanup, "Failed to remove unrecorded artifact");
            }
            return Err(e);
        }

        info!(
            filename = %record.filename,
            plaintext_bytes = plaintext_len,
            size_bytes = record.size_bytes,
            compressed = record.compressed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Backup created"
        );
        Ok(record)
    }

    /// Decrypt and check an artifact without touching any database.
    ///
    /// Returns `Ok(false)` when the artifact fails integrity checks. A missing
    /// record or an unreadable backup directory is still an error.
    pub fn verify(&self, filename: &str) -> Result<bool> {
        let record = self.store.find_record(filename)?;
        let outcome = self
            .open_artifact(&record)
            .and_then(|plaintext| check_checksum(&record, &compute_checksum(&plaintext)));

        match outcome {
            Ok(()) => {
                debug!(filename = %filename, "Backup verified");
                Ok(true)
            }
            Err(e @ BackupError::Integrity { .. }) => {
                warn!(filename = %filename, error = %e, "Backup failed verification");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Restore `filename` over `target`.
    ///
    /// The plaintext is staged in a temp file next to `target` and checked
    /// against the recorded checksum. `target` is only replaced, by rename,
    /// once that check passes.
    pub fn restore(&self, filename: &str, target: &Path) -> Result<()> {
        let record = self.store.find_record(filename)?;
        let plaintext = self.open_artifact(&record)?;

        let target_dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        fs::create_dir_all(&target_dir)?;

        let mut staged = tempfile::Builder::new()
            .prefix(RESTORE_PREFIX)
            .tempfile_in(&target_dir)?;
        staged.write_all(&plaintext)?;
        staged.as_file().sync_all()?;
        drop(plaintext);

        check_checksum(&record, &checksum_file(staged.path())?)?;

        staged.persist(target).map_err(|e| {
            BackupError::Storage(format!("failed to replace {}: {}", target.display(), e.error))
        })?;

        info!(filename = %filename, target = %target.display(), "Backup restored");
        Ok(())
    }

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        self.store.list_records()
    }

    /// Operator-initiated removal of one backup
    pub fn delete_backup(&self, filename: &str) -> Result<BackupRecord> {
        self.store.remove_record(filename)
    }

    pub fn apply_retention(&self) -> Result<Vec<BackupRecord>> {
        retention::apply_retention(&self.store, self.config.retention_days, Utc::now())
    }

    /// Age retention that leaves `spare` in place regardless of its age
    pub fn apply_retention_sparing(&self, spare: Option<&str>) -> Result<Vec<BackupRecord>> {
        retention::apply_retention_sparing(
            &self.store,
            self.config.retention_days,
            Utc::now(),
            spare,
        )
    }

    pub fn enforce_capacity(&self) -> Result<Vec<BackupRecord>> {
        retention::enforce_capacity(&self.store, self.config.max_backups)
    }

    pub fn reconcile(&self) -> Result<ReconcileReport> {
        self.store.reconcile(ORPHAN_GRACE)
    }

    /// Read, decrypt and decompress an artifact. Any failure that points at a
    /// damaged artifact or a wrong key surfaces as an integrity error.
    fn open_artifact(&self, record: &BackupRecord) -> Result<Vec<u8>> {
        let artifact = self.store.read_artifact(&record.filename)?;

        if artifact.len() as u64 != record.size_bytes {
            return Err(BackupError::integrity(
                &record.filename,
                format!(
                    "size mismatch: ledger says {} bytes, found {}",
                    record.size_bytes,
                    artifact.len()
                ),
            ));
        }

        let decrypted = match decrypt(&artifact, &self.config.encryption_key) {
            Ok(bytes) => bytes,
            Err(e) => return Err(BackupError::integrity(&record.filename, e.to_string())),
        };

        if record.compressed {
            zstd::decode_all(decrypted.as_slice()).map_err(|e| {
                BackupError::integrity(&record.filename, format!("decompression failed: {}", e))
            })
        } else {
            Ok(decrypted)
        }
    }

    /// Run one stage, logging it and enforcing the step timeout.
    fn run_stage<T>(&self, stage: BackupStage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        debug!(stage = %stage, "Backup stage started");

        let out = f().map_err(|e| {
            warn!(stage = %stage, error = %e, "Backup stage failed");
            e
        })?;

        let elapsed = started.elapsed();
        if elapsed > self.config.step_timeout {
            let msg = format!(
                "{} exceeded step timeout ({:?} > {:?})",
                stage, elapsed, self.config.step_timeout
            );
            return Err(match stage {
                BackupStage::Snapshotting => BackupError::Snapshot(msg),
                BackupStage::Encrypting => BackupError::Encryption(msg),
                _ => BackupError::Storage(msg),
            });
        }
        Ok(out)
    }
}

fn check_checksum(record: &BackupRecord, actual: &str) -> Result<()> {
    if actual == record.checksum {
        Ok(())
    } else {
        Err(BackupError::integrity(
            &record.filename,
            format!("checksum mismatch: expected {}, got {}", record.checksum, actual),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;
    use crate::snapshot::tests::seed_database;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) fn test_config(dir: &Path) -> BackupConfig {
        BackupConfig::new(
            dir.join("app.db"),
            dir.join("backups"),
            EncryptionKey::from_material("unit-test-key").unwrap(),
        )
    }

    /// Writes fixed bytes instead of exporting a database
    pub(crate) struct FixedSnapshot(pub Vec<u8>);

    impl SnapshotProducer for FixedSnapshot {
        fn snapshot(&self, _source: &Path, dest: &Path) -> Result<()> {
            fs::write(dest, &self.0)?;
            Ok(())
        }
    }

    /// Fails after writing a partial file
    struct FailingSnapshot {
        calls: Arc<AtomicUsize>,
    }

    impl SnapshotProducer for FailingSnapshot {
        fn snapshot(&self, _source: &Path, dest: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::write(dest, b"partial")?;
            Err(BackupError::Snapshot("database is locked".into()))
        }
    }

    fn leftover_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy().to_string();
                name.starts_with(".snapshot-") || name.starts_with(".restore-")
            })
            .collect()
    }

    fn flip_byte(service: &BackupService, filename: &str, offset: usize) {
        let path = service.store().artifact_path(filename);
        let mut bytes = fs::read(&path).unwrap();
        bytes[offset] ^= 0x01;
        fs::write(&path, bytes).unwrap();
    }

    #[test]
    fn test_create_backup_from_sqlite() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(dir.path());
        seed_database(&config.database_path, 200)?;
        let service = BackupService::new(config)?;

        let record = service.create_backup()?;

        let on_disk = fs::metadata(service.store().artifact_path(&record.filename))?.len();
        assert_eq!(record.size_bytes, on_disk);
        assert!(record.encrypted);
        assert!(record.compressed);
        assert!(service.verify(&record.filename)?);
        assert_eq!(service.list_backups()?, vec![record]);
        assert!(leftover_files(service.store().dir()).is_empty());
        Ok(())
    }

    #[test]
    fn test_ten_kb_snapshot_size_is_ciphertext_size() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut config = test_config(dir.path());
        config.compression = false;
        let plaintext: Vec<u8> = (0..10 * 1024).map(|i| (i % 251) as u8).collect();
        let service =
            BackupService::with_snapshotter(config, Box::new(FixedSnapshot(plaintext.clone())))?;

        let record = service.create_backup()?;

        assert_ne!(record.size_bytes, 10 * 1024);
        assert_eq!(record.size_bytes, 10 * 1024 + 17 + 16);
        assert_eq!(
            record.size_bytes,
            fs::metadata(service.store().artifact_path(&record.filename))?.len()
        );
        assert_eq!(record.checksum, compute_checksum(&plaintext));
        assert!(service.verify(&record.filename)?);
        Ok(())
    }

    #[test]
    fn test_snapshot_failure_leaves_no_trace() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let calls = Arc::new(AtomicUsize::new(0));
        let service = BackupService::with_snapshotter(
            test_config(dir.path()),
            Box::new(FailingSnapshot { calls: calls.clone() }),
        )?;

        let err = service.create_backup().unwrap_err();

        assert!(matches!(err, BackupError::Snapshot(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(service.list_backups()?.is_empty());
        assert!(leftover_files(service.store().dir()).is_empty());
        let artifacts = fs::read_dir(service.store().dir())?
            .filter_map(|e| e.ok())
            .filter(|e| crate::store::is_artifact_name(&e.file_name().to_string_lossy()))
            .count();
        assert_eq!(artifacts, 0);
        Ok(())
    }

    #[test]
    fn test_missing_source_database() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = BackupService::new(test_config(dir.path()))?;
        assert!(matches!(service.create_backup(), Err(BackupError::Snapshot(_))));
        assert!(service.list_backups()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_tampered_artifact_fails_verify_and_restore() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = BackupService::with_snapshotter(
            test_config(dir.path()),
            Box::new(FixedSnapshot(b"ledger rows".repeat(100))),
        )?;
        let record = service.create_backup()?;
        let len = record.size_bytes as usize;

        for offset in [0, 4, 10, 20, len / 2, len - 1] {
            flip_byte(&service, &record.filename, offset);
            assert!(!service.verify(&record.filename)?, "offset {}", offset);

            let target = dir.path().join("restored.db");
            let err = service.restore(&record.filename, &target).unwrap_err();
            assert!(matches!(err, BackupError::Integrity { .. }));
            assert!(!target.exists());

            flip_byte(&service, &record.filename, offset);
            assert!(service.verify(&record.filename)?);
        }
        Ok(())
    }

    #[test]
    fn test_truncated_artifact_is_integrity_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = BackupService::with_snapshotter(
            test_config(dir.path()),
            Box::new(FixedSnapshot(vec![42u8; 4096])),
        )?;
        let record = service.create_backup()?;
        let path = service.store().artifact_path(&record.filename);
        let bytes = fs::read(&path)?;
        fs::write(&path, &bytes[..bytes.len() - 100])?;

        assert!(!service.verify(&record.filename)?);
        Ok(())
    }

    #[test]
    fn test_wrong_key_fails_integrity() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = BackupService::with_snapshotter(
            test_config(dir.path()),
            Box::new(FixedSnapshot(b"payload".to_vec())),
        )?;
        let record = service.create_backup()?;

        let mut other = test_config(dir.path());
        other.encryption_key = EncryptionKey::from_material("rotated-key").unwrap();
        let other = BackupService::with_snapshotter(other, Box::new(FixedSnapshot(Vec::new())))?;

        assert!(!other.verify(&record.filename)?);
        Ok(())
    }

    #[test]
    fn test_restore_replaces_target() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = test_config(dir.path());
        seed_database(&config.database_path, 50)?;
        let service = BackupService::new(config.clone())?;
        let record = service.create_backup()?;

        seed_database(&config.database_path, 25)?;
        service.restore(&record.filename, &config.database_path)?;

        let conn = rusqlite::Connection::open(&config.database_path)?;
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM leads", [], |r| r.get(0))?;
        assert_eq!(rows, 50);
        assert!(leftover_files(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_restore_leaves_target_untouched() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = BackupService::with_snapshotter(
            test_config(dir.path()),
            Box::new(FixedSnapshot(b"good snapshot".to_vec())),
        )?;
        let record = service.create_backup()?;

        let target = dir.path().join("live.db");
        fs::write(&target, b"live database contents")?;
        flip_byte(&service, &record.filename, 30);

        assert!(service.restore(&record.filename, &target).is_err());
        assert_eq!(fs::read(&target)?, b"live database contents");
        assert!(leftover_files(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn test_ledger_checksum_mismatch_is_integrity_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = BackupService::with_snapshotter(
            test_config(dir.path()),
            Box::new(FixedSnapshot(b"snapshot".to_vec())),
        )?;
        let record = service.create_backup()?;

        // Rewrite the ledger entry with a wrong checksum.
        service.store().remove_record(&record.filename).ok();
        let artifact = encrypt(
            &zstd::encode_all(&b"snapshot"[..], COMPRESSION_LEVEL)?,
            &service.config().encryption_key,
        )?;
        let filename = service.store().persist(record.timestamp, &artifact)?;
        service.store().append_record(BackupRecord {
            filename: filename.clone(),
            size_bytes: artifact.len() as u64,
            checksum: compute_checksum(b"something else"),
            ..record
        })?;

        assert!(!service.verify(&filename)?);
        let target = dir.path().join("out.db");
        let err = service.restore(&filename, &target).unwrap_err();
        assert_eq!(err.kind(), "IntegrityError");
        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn test_unknown_filename_is_not_found() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let service = BackupService::new(test_config(dir.path()))?;
        let name = crate::store::artifact_filename(Utc::now());

        assert!(service.verify(&name).unwrap_err().is_not_found());
        assert!(service.restore(&name, &dir.path().join("x.db")).unwrap_err().is_not_found());
        assert!(service.delete_backup(&name).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn test_uncompressed_round_trip() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut config = test_config(dir.path());
        config.compression = false;
        let service =
            BackupService::with_snapshotter(config, Box::new(FixedSnapshot(b"raw".to_vec())))?;
        let record = service.create_backup()?;
        assert!(!record.compressed);

        let target = dir.path().join("restored.db");
        service.restore(&record.filename, &target)?;
        assert_eq!(fs::read(&target)?, b"raw");
        Ok(())
    }
}
