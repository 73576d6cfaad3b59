// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Exclusive, timed lock on a sidecar file next to the store.

use crate::error::{ScrapeError, ScrapeResult};
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Interval between lock attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held lock; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// `<store>.lock`
    pub fn path_for(store: &Path) -> PathBuf {
        let mut name = store.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquire the lock for `store`, polling until `timeout` has elapsed.
    ///
    /// Blocks the calling thread.
    pub fn acquire(store: &Path, timeout: Duration) -> ScrapeResult<Self> {
        let path = Self::path_for(store);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let start = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => {
                    tracing::debug!("acquired {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(TryLockError::WouldBlock) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(ScrapeError::LockTimeout { path, waited });
                    }
                    std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("failed to release {}: {e}", self.path.display());
        }
    }
}
