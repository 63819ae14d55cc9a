//! Ledger record type and artifact naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::errors::{BackupError, Result};

pub const ARTIFACT_PREFIX: &str = "database-backup-";
pub const ARTIFACT_SUFFIX: &str = ".backup.enc";

/// Metadata for one completed backup. Serialized into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    /// Size of the encrypted artifact on disk
    pub size_bytes: u64,
    /// SHA-256 of the plaintext snapshot
    pub checksum: String,
    #[serde(default = "default_true")]
    pub encrypted: bool,
    #[serde(default)]
    pub compressed: bool,
}

fn default_true() -> bool {
    true
}

impl BackupRecord {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }
}

/// `database-backup-2026-10-19T02-00-00-000Z.backup.enc`
pub fn artifact_filename(timestamp: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        ARTIFACT_PREFIX,
        timestamp.format("%Y-%m-%dT%H-%M-%S-%3fZ"),
        ARTIFACT_SUFFIX
    )
}

/// True for names this engine could have produced.
pub fn is_artifact_name(name: &str) -> bool {
    name.len() > ARTIFACT_PREFIX.len() + ARTIFACT_SUFFIX.len()
        && name.starts_with(ARTIFACT_PREFIX)
        && name.ends_with(ARTIFACT_SUFFIX)
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

/// Reject operator-supplied names that could escape the backup directory.
pub fn validate_filename(name: &str) -> Result<()> {
    if is_artifact_name(name) {
        Ok(())
    } else {
        Err(BackupError::NotFound(name.to_string()))
    }
}
