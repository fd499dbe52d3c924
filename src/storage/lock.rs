//! Exclusive lock on a store file.
//!
//! LMDB happily lets several processes share an environment, but a
//! redirect store is owned by exactly one server. The lock is taken on a
//! sibling `<store>.lock` file and waits at most a bounded time, so a second
//! instance pointed at the same store fails at startup instead of hanging.

use super::StorageError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Held for as long as the store is open; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Lock `<store_path>.lock`, retrying until `timeout` elapses.
    pub fn acquire<P: AsRef<Path>>(store_path: P, timeout: Duration) -> Result<Self, StorageError> {
        let store_path = store_path.as_ref();
        let path = lock_path_for(store_path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!(path = %parent.display(), "Created store directory");
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    info!(path = %path.display(), "Acquired store lock");
                    return Ok(Self { file, path });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        error!(
                            path = %path.display(),
                            ?waited,
                            "Store is locked by another process"
                        );
                        return Err(StorageError::LockTimeout { path, waited });
                    }
                    std::thread::sleep(RETRY_INTERVAL.min(timeout - waited));
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to lock store");
                    return Err(StorageError::Io(e));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            error!(path = %self.path.display(), error = %e, "Failed to release store lock");
        } else {
            info!(path = %self.path.display(), "Released store lock");
        }
    }
}

fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

// EWOULDBLOCK is 11 on Linux, 35 on macOS.
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || matches!(err.raw_os_error(), Some(11) | Some(35))
}
