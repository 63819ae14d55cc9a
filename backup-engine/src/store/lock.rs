//! Advisory cross-process file locks.
//!
//! Used for ledger read-modify-write and for whole backup cycles, so a second
//! process sharing the backup directory cannot interleave with this one.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::utils::errors::Result;

/// Exclusive `flock` on a lock file. Released on drop.
pub struct FileLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use crate::utils::errors::BackupError;
            use nix::fcntl::{Flock, FlockArg};

            let flock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
                BackupError::Storage(format!("failed to lock {}: {}", path.display(), errno))
            })?;
            Ok(Self { _flock: flock })
        }

        #[cfg(not(unix))]
        {
            Ok(Self { _file: file })
        }
    }
}
