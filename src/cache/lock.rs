//! Exclusive ownership of a cache directory.
//!
//! One [`CacheStore`](super::CacheStore) at a time may own a directory: each
//! checkpoint rewrites the snapshot from its own index and truncates the
//! journal, so a second writer would silently drop the first one's entries.
//! The lock is an OS advisory lock on `store.lock`, released when the owning
//! file handle closes (including when the process dies).

use super::CacheError;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const LOCK_FILE: &str = "store.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct DirectoryLock {
    path: PathBuf,
    // Held for its lock; closing the handle releases it.
    _file: File,
}

impl DirectoryLock {
    /// Lock `dir`, waiting up to `timeout` for another owner to let go.
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<Self, CacheError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;

        let start = Instant::now();
        let mut announced = false;
        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(CacheError::Locked {
                            path,
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    if !announced {
                        tracing::info!(
                            directory = %dir.display(),
                            "Cache directory is in use, waiting for it to be released"
                        );
                        announced = true;
                    }
                    std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(TryLockError::Error(e)) => return Err(CacheError::io(&path, e)),
            }
        }

        tracing::trace!(path = %path.display(), "Cache directory locked");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
