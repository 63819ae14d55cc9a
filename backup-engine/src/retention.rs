//! Age-based retention and the capacity ceiling.
//!
//! Both passes go through `BackupStore::remove_record`, so every eviction
//! deletes the artifact before its ledger entry. A file that cannot be removed
//! is logged and skipped; the pass carries on with the rest.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::store::{BackupRecord, BackupStore};
use crate::utils::errors::Result;

/// Remove every backup older than `retention_days`. 0 disables expiry.
pub fn apply_retention(
    store: &BackupStore,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<BackupRecord>> {
    apply_retention_sparing(store, retention_days, now, None)
}

/// Like [`apply_retention`], but never expires the record named `spare`.
///
/// A cycle spares the newest older backup until the backup it just wrote has
/// passed verification, so a bad new artifact cannot leave the directory with
/// nothing restorable.
pub fn apply_retention_sparing(
    store: &BackupStore,
    retention_days: u32,
    now: DateTime<Utc>,
    spare: Option<&str>,
) -> Result<Vec<BackupRecord>> {
    if retention_days == 0 {
        return Ok(Vec::new());
    }

    // A window reaching past the representable calendar expires nothing.
    let Some(cutoff) = chrono::Duration::try_days(i64::from(retention_days))
        .and_then(|window| now.checked_sub_signed(window))
    else {
        return Ok(Vec::new());
    };

    let expired: Vec<_> = store
        .list_records()?
        .into_iter()
        .filter(|r| r.timestamp < cutoff && Some(r.filename.as_str()) != spare)
        .collect();

    Ok(remove_each(store, expired, "retention"))
}

/// Evict the oldest backups until at most `max_records` remain. 0 disables
/// the ceiling.
///
/// Runs after retention and can evict backups younger than the retention
/// window: the ceiling always wins.
pub fn enforce_capacity(store: &BackupStore, max_records: usize) -> Result<Vec<BackupRecord>> {
    if max_records == 0 {
        return Ok(Vec::new());
    }

    // Oldest first, so the excess is a prefix.
    let records = store.list_records()?;
    let excess = records.len().saturating_sub(max_records);
    let evict: Vec<_> = records.into_iter().take(excess).collect();

    Ok(remove_each(store, evict, "capacity"))
}

fn remove_each(store: &BackupStore, records: Vec<BackupRecord>, reason: &str) -> Vec<BackupRecord> {
    let mut removed = Vec::with_capacity(records.len());
    for record in records {
        match store.remove_record(&record.filename) {
            Ok(r) => removed.push(r),
            Err(e) => warn!(
                filename = %record.filename,
                reason,
                error = %e,
                "Failed to remove backup, skipping"
            ),
        }
    }
    if !removed.is_empty() {
        info!(count = removed.len(), reason, "Old backups removed");
    }
    removed
}
