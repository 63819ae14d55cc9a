//! Custom error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Integrity error for {filename}: {reason}")]
    Integrity { filename: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl BackupError {
    /// Stable kind string used in notifications and status responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "SnapshotError",
            Self::Encryption(_) => "EncryptionError",
            Self::Integrity { .. } => "IntegrityError",
            Self::Storage(_) => "StorageError",
            Self::NotFound(_) => "NotFoundError",
            Self::Config(_) => "ConfigError",
            Self::Scheduler(_) => "SchedulerError",
        }
    }

    /// Snapshot and storage failures may succeed on the next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Snapshot(_) | Self::Storage(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn integrity(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            filename: filename.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("ledger serialization failed: {}", err))
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for BackupError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(BackupError::Snapshot("x".into()).kind(), "SnapshotError");
        assert_eq!(BackupError::integrity("a", "b").kind(), "IntegrityError");
        assert_eq!(BackupError::NotFound("a".into()).kind(), "NotFoundError");
    }

    #[test]
    fn test_integrity_display() {
        let err = BackupError::integrity("database-backup-x.backup.enc", "checksum mismatch");
        assert_eq!(
            err.to_string(),
            "Integrity error for database-backup-x.backup.enc: checksum mismatch"
        );
    }

    #[test]
    fn test_from_io_error_is_storage() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: BackupError = io_err.into();
        assert!(matches!(err, BackupError::Storage(_)));
        assert!(err.is_retryable());
    }
}
