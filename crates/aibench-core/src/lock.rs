//! File-based workspace lock with process-liveness staleness.
//!
//! The lock file holds a JSON [`LockRecord`]. A record whose `pid` does not
//! resolve to a running process is stale and is reclaimed by the next
//! acquirer. File age is never consulted, so a long-running holder is never
//! evicted.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::domain::error::LockError;
use crate::metrics::METRICS;

/// File name of the lock inside a run directory.
pub const LOCK_FILE_NAME: &str = ".aibench.lock";

type Result<T> = std::result::Result<T, LockError>;

/// Persisted content of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub repo: String,
}

impl LockRecord {
    fn current(repo: &str) -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now(),
            repo: repo.to_string(),
        }
    }
}

/// Exclusive hold on a lock path. Released on [`LockHandle::release`] or drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Rewrite the lock record with a fresh timestamp.
    pub fn refresh(&mut self) -> Result<()> {
        self.record = LockRecord::current(&self.record.repo);
        let tmp = write_temp(&self.path, &self.record)?;
        tmp.persist(&self.path).map_err(|e| LockError::Io {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Delete the lock file. Failures are logged, never returned.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match read_record(&self.path) {
            Ok(Some(record)) if record.pid != self.record.pid => {
                warn!(
                    path = %self.path.display(),
                    holder = record.pid,
                    "lock now held by another process; leaving it in place"
                );
                return;
            }
            _ => {}
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to delete lock file"),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Acquire the lock at `path` for `repo`.
///
/// Fails with [`LockError::Locked`] when a live process holds it. A stale
/// record is deleted and acquisition retried once.
pub fn acquire(path: &Path, repo: &str) -> Result<LockHandle> {
    for attempt in 0..2 {
        let record = LockRecord::current(repo);
        match try_create(path, &record) {
            Ok(()) => {
                debug!(path = %path.display(), attempt, "lock acquired");
                return Ok(LockHandle {
                    path: path.to_path_buf(),
                    record,
                    released: false,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        let stale = match read_record(path) {
            Ok(Some(existing)) if is_pid_alive(existing.pid) => {
                return Err(LockError::Locked {
                    path: path.to_path_buf(),
                    pid: existing.pid,
                });
            }
            // Vanished between our create and read; just retry.
            Ok(None) => continue,
            Ok(Some(existing)) => {
                warn!(path = %path.display(), stale_pid = existing.pid, "reclaiming stale lock");
                Some(existing)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reclaiming unreadable lock");
                None
            }
        };

        // Another acquirer may have reclaimed it first.
        if let Some(stale) = &stale {
            if read_record(path).ok().flatten().as_ref() != Some(stale) {
                continue;
            }
        }

        match fs::remove_file(path) {
            Ok(()) => METRICS.inc_stale_locks_reclaimed(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    let pid = read_record(path).ok().flatten().map(|r| r.pid).unwrap_or(0);
    Err(LockError::Locked {
        path: path.to_path_buf(),
        pid,
    })
}

/// Release a held lock. Equivalent to [`LockHandle::release`].
pub fn release(handle: LockHandle) {
    handle.release();
}

/// Whether `path` is held by a live process.
pub fn is_locked(path: &Path) -> bool {
    matches!(read_record(path), Ok(Some(record)) if is_pid_alive(record.pid))
}

/// Read the lock record at `path`; `Ok(None)` when no lock file exists.
pub fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_temp(path: &Path, record: &LockRecord) -> Result<NamedTempFile> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    let body = serde_json::to_vec_pretty(record)?;
    tmp.write_all(&body).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    Ok(tmp)
}

/// Publish the record atomically; `AlreadyExists` when a lock is present.
fn try_create(path: &Path, record: &LockRecord) -> io::Result<()> {
    let tmp = write_temp(path, record).map_err(|e| match e {
        LockError::Io { source, .. } => source,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    })?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// Check whether a process with `pid` exists on this host.
///
/// On unix this uses `kill(pid, 0)`, which probes existence without
/// delivering a signal. Elsewhere only the current process counts as alive,
/// so locks left by any other process are reclaimed.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs only the existence and permission check.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        pid as u32 == std::process::id()
    }
}
