//! Directory-scoped advisory locks with lease records.
//!
//! A repository working directory `dir` is guarded by an OS file lock on the
//! sibling file `<dir>.lock`. Acquisition polls until a hard timeout. Each
//! successful acquisition rewrites the lock file with a [`LeaseRecord`] whose
//! fencing token is one higher than the previous holder's.
//!
//! Expired leases are reported but never broken: the OS releases the lock when
//! the holding process dies, so a live holder past its lease is only slow.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MediaError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Contents of a lock file while (or after) it is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub token: u64,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub lease_secs: u64,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let lease = chrono::Duration::seconds(self.lease_secs.min(i64::MAX as u64) as i64);
        self.acquired_at + lease < now
    }
}

/// Advisory lock for one directory.
#[derive(Debug, Clone)]
pub struct DirectoryLock {
    path: PathBuf,
    timeout: Duration,
    lease: Duration,
}

impl DirectoryLock {
    pub fn new(dir: &Path, timeout: Duration, lease: Duration) -> Self {
        Self {
            path: lock_path_for(dir),
            timeout,
            lease,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the lock, failing with [`MediaError::LockTimeout`].
    pub async fn acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let started = Instant::now();
        let mut reported_expiry = false;

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;

            match file.try_lock_exclusive() {
                Ok(()) => return self.take_lease(file),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {}
                Err(e) => return Err(e.into()),
            }
            drop(file);

            if !reported_expiry {
                if let Some(lease) = read_lease(&self.path) {
                    if lease.is_expired(Utc::now()) {
                        warn!(
                            lock = %self.path.display(),
                            token = lease.token,
                            holder_pid = lease.pid,
                            acquired_at = %lease.acquired_at,
                            "Lock holder exceeded its lease; waiting"
                        );
                        reported_expiry = true;
                    }
                }
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                warn!(lock = %self.path.display(), waited_ms = waited.as_millis() as u64, "Lock timeout");
                return Err(MediaError::LockTimeout {
                    path: self.path.clone(),
                    waited,
                });
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn take_lease(&self, mut file: File) -> Result<LockGuard> {
        let mut previous = String::new();
        file.read_to_string(&mut previous)?;
        let last_token = serde_json::from_str::<LeaseRecord>(&previous)
            .map(|r| r.token)
            .unwrap_or(0);

        let record = LeaseRecord {
            token: last_token + 1,
            pid: std::process::id(),
            acquired_at: Utc::now(),
            lease_secs: self.lease.as_secs(),
        };

        let json = serde_json::to_vec(&record)
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&json)?;
        file.sync_data()?;

        debug!(lock = %self.path.display(), token = record.token, "Lock acquired");

        Ok(LockGuard {
            file,
            path: self.path.clone(),
            token: record.token,
        })
    }
}

/// Held lock. Dropping the guard closes the file and releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
    token: u64,
}

impl LockGuard {
    /// Fencing token of this acquisition.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Confirm the lock file still carries this guard's token.
    ///
    /// Fails with [`MediaError::StaleLease`] when the lock file was removed or
    /// rewritten by someone who did not hold the lock.
    pub fn ensure_current(&self) -> Result<()> {
        let latest = read_lease(&self.path).map(|r| r.token).unwrap_or(0);
        if latest != self.token {
            return Err(MediaError::StaleLease {
                path: self.path.clone(),
                token: self.token,
                latest,
            });
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(lock = %self.path.display(), token = self.token, "Lock released");
    }
}

/// `<dir>.lock` next to the directory.
pub fn lock_path_for(dir: &Path) -> PathBuf {
    match dir.file_name() {
        Some(name) => {
            let mut lock_name = name.to_os_string();
            lock_name.push(".lock");
            dir.with_file_name(lock_name)
        }
        None => dir.join(".lock"),
    }
}

fn read_lease(path: &Path) -> Option<LeaseRecord> {
    let data = std::fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}
