//! Backup Engine Library
//!
//! Scheduled, encrypted, integrity-checked backups of a SQLite database.
//!
//! A cycle snapshots the live database through SQLite's online backup API,
//! checksums the plaintext, optionally compresses it, encrypts it with
//! AES-256-GCM and records it in a JSON ledger next to the artifacts. Retention
//! and a capacity ceiling prune old backups afterwards.

pub mod config;
pub mod crypto;
pub mod daemon;
pub mod lifecycle;
pub mod notify;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::{BackupConfig, EngineConfig, ScheduleConfig};
pub use lifecycle::{BackupLifecycle, BackupStatus};
pub use scheduler::{BackupScheduler, CycleReport};
pub use service::BackupService;
pub use store::BackupRecord;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
