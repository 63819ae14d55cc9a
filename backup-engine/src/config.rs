//! Configuration management for the backup engine.
//!
//! Read once at startup from the environment (a `.env` file is honoured).
//! Nothing here is hot-reloadable.

use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::EncryptionKey;
use crate::utils::errors::{BackupError, Result};

/// Settings the backup service holds for its lifetime
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Live database to snapshot (read-only from our side)
    pub database_path: PathBuf,

    /// Directory holding artifacts and the ledger
    pub backup_dir: PathBuf,

    pub encryption_key: EncryptionKey,

    /// Age after which backups expire. 0 disables age expiry.
    pub retention_days: u32,

    /// zstd-compress snapshots before encryption
    pub compression: bool,

    /// Hard ceiling on retained backups. 0 disables the ceiling.
    pub max_backups: usize,

    /// Upper bound for the snapshot and encryption steps
    pub step_timeout: Duration,
}

/// Settings owned by the scheduler
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Cron expression, five or six fields
    pub cron: String,

    /// Verify each new artifact right after it is written
    pub health_check: bool,

    /// Webhook receiving cycle notifications
    pub notification_url: Option<String>,
}

/// Everything the daemon reads at startup
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backup: BackupConfig,
    pub schedule: ScheduleConfig,
    pub log_level: String,
    /// Port for the HTTP status surface. Disabled when unset.
    pub status_port: Option<u16>,
}

// Default values
fn default_database_path() -> PathBuf {
    PathBuf::from("./data/app.db")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_backups() -> usize {
    50
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_cron() -> String {
    // 02:00 every day
    "0 0 2 * * *".to_string()
}

impl BackupConfig {
    /// Defaults for everything but the paths and key
    pub fn new(
        database_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        encryption_key: EncryptionKey,
    ) -> Self {
        Self {
            database_path: database_path.into(),
            backup_dir: backup_dir.into(),
            encryption_key,
            retention_days: default_retention_days(),
            compression: true,
            max_backups: default_max_backups(),
            step_timeout: default_step_timeout(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            health_check: true,
            notification_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from process environment, after applying `.env` if present
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key/value source
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let key_material = value("BACKUP_ENCRYPTION_KEY").ok_or_else(|| {
            BackupError::Config("BACKUP_ENCRYPTION_KEY must be set".to_string())
        })?;

        let backup = BackupConfig {
            database_path: value("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_database_path),
            backup_dir: value("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_backup_dir),
            encryption_key: EncryptionKey::from_material(&key_material)?,
            retention_days: parse_or("BACKUP_RETENTION_DAYS", value("BACKUP_RETENTION_DAYS"), default_retention_days())?,
            compression: parse_bool_or("BACKUP_COMPRESSION", value("BACKUP_COMPRESSION"), true)?,
            max_backups: parse_or("BACKUP_MAX_COUNT", value("BACKUP_MAX_COUNT"), default_max_backups())?,
            step_timeout: Duration::from_secs(parse_or(
                "BACKUP_STEP_TIMEOUT_SECS",
                value("BACKUP_STEP_TIMEOUT_SECS"),
                default_step_timeout().as_secs(),
            )?),
        };

        let schedule = ScheduleConfig {
            cron: value("BACKUP_SCHEDULE").unwrap_or_else(default_cron),
            health_check: parse_bool_or("BACKUP_HEALTH_CHECK", value("BACKUP_HEALTH_CHECK"), true)?,
            notification_url: value("BACKUP_NOTIFICATION_URL"),
        };

        Ok(Self {
            backup,
            schedule,
            log_level: value("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            status_port: value("STATUS_PORT")
                .map(|v| parse_value("STATUS_PORT", &v))
                .transpose()?,
        })
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| BackupError::Config(format!("{} has an invalid value: {:?}", key, raw)))
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_bool_or(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(BackupError::Config(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[("BACKUP_ENCRYPTION_KEY", "k")])).unwrap();

        assert_eq!(config.backup.database_path, PathBuf::from("./data/app.db"));
        assert_eq!(config.backup.backup_dir, PathBuf::from("./backups"));
        assert_eq!(config.backup.retention_days, 30);
        assert_eq!(config.backup.max_backups, 50);
        assert!(config.backup.compression);
        assert_eq!(config.backup.step_timeout, Duration::from_secs(300));
        assert_eq!(config.schedule.cron, "0 0 2 * * *");
        assert!(config.schedule.health_check);
        assert!(config.schedule.notification_url.is_none());
        assert_eq!(config.log_level, "info");
        assert!(config.status_port.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("BACKUP_ENCRYPTION_KEY", "k"),
            ("DATABASE_PATH", "/srv/app/prod.db"),
            ("BACKUP_DIR", "/mnt/backups"),
            ("BACKUP_RETENTION_DAYS", "7"),
            ("BACKUP_COMPRESSION", "false"),
            ("BACKUP_SCHEDULE", "0 */6 * * *"),
            ("BACKUP_MAX_COUNT", "5"),
            ("BACKUP_HEALTH_CHECK", "0"),
            ("BACKUP_NOTIFICATION_URL", "https://hooks.example.com/backup"),
            ("STATUS_PORT", "9400"),
        ]))
        .unwrap();

        assert_eq!(config.backup.database_path, PathBuf::from("/srv/app/prod.db"));
        assert_eq!(config.backup.retention_days, 7);
        assert!(!config.backup.compression);
        assert_eq!(config.backup.max_backups, 5);
        assert_eq!(config.schedule.cron, "0 */6 * * *");
        assert!(!config.schedule.health_check);
        assert_eq!(
            config.schedule.notification_url.as_deref(),
            Some("https://hooks.example.com/backup")
        );
        assert_eq!(config.status_port, Some(9400));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = EngineConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_malformed_values_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("BACKUP_ENCRYPTION_KEY", "k"),
            ("BACKUP_RETENTION_DAYS", "thirty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BACKUP_RETENTION_DAYS"));

        let err = EngineConfig::from_lookup(lookup(&[
            ("BACKUP_ENCRYPTION_KEY", "k"),
            ("BACKUP_HEALTH_CHECK", "maybe"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BACKUP_HEALTH_CHECK"));
    }
}
