//! Advisory file lock keyed by a table path
//!
//! Cooperative, non-kernel-enforced mutual exclusion: a sibling marker file
//! `<table>.lock` is created atomically (`O_EXCL`) and carries the holder's
//! identity for diagnosability. Advisory among cooperating processes, not
//! deadlock-proof. The lock never retries internally; callers own the retry
//! policy.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Exclusive-acquisition seam used by the writer pipeline. `FileLock` is the
/// production implementation; tests inject fakes that assert exclusivity.
pub trait TableLock: Send {
    /// Try to take the lock once. `Ok(false)` when another holder has it.
    fn try_acquire(&mut self) -> Result<bool>;
    /// Release the lock if held.
    fn release(&mut self) -> Result<()>;
}

/// Identity written into the marker file so a stuck lock can be traced to
/// its holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    /// PID of the locking process.
    pub pid: u32,
    /// Hostname of the locking machine ("unknown" if undeterminable).
    pub hostname: String,
    /// Free-form holder description (e.g. the table being written).
    pub holder: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current(holder: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            hostname: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".into()),
            holder: holder.into(),
            acquired_at: Utc::now(),
        }
    }
}

/// Advisory lock over a shared table path.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
    holder: String,
    held: bool,
}

impl FileLock {
    /// Create an (unacquired) lock guarding `path`. The marker file is the
    /// sibling `<path>.lock`.
    #[must_use]
    pub fn new(path: &Path, holder: impl Into<String>) -> Self {
        let mut os = path.as_os_str().to_owned();
        os.push(".lock");
        Self {
            lock_path: PathBuf::from(os),
            holder: holder.into(),
            held: false,
        }
    }

    /// Path of the marker file.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Read the identity of the current holder, if the marker exists and
    /// parses. Diagnostic only.
    #[must_use]
    pub fn current_holder(&self) -> Option<LockHolder> {
        let contents = std::fs::read_to_string(&self.lock_path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl TableLock for FileLock {
    fn try_acquire(&mut self) -> Result<bool> {
        if self.held {
            return Ok(true);
        }
        // create_new is the atomicity point: exactly one creator wins.
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Some(holder) = self.current_holder() {
                    debug!(
                        lock = %self.lock_path.display(),
                        pid = holder.pid,
                        holder = %holder.holder,
                        "lock held by another process"
                    );
                }
                return Ok(false);
            }
            Err(e) => return Err(Error::Lock(format!(
                "cannot create marker {}: {e}",
                self.lock_path.display()
            ))),
        };

        let identity = LockHolder::current(&self.holder);
        let json = serde_json::to_vec(&identity)
            .map_err(|e| Error::Lock(format!("cannot encode holder identity: {e}")))?;
        // A marker without identity still excludes; a write failure here is
        // a diagnosability loss, not a correctness loss.
        let mut file = file;
        if let Err(e) = file.write_all(&json) {
            warn!(lock = %self.lock_path.display(), "cannot write holder identity: {e}");
        }
        self.held = true;
        debug!(lock = %self.lock_path.display(), "lock acquired");
        Ok(true)
    }

    fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => {
                debug!(lock = %self.lock_path.display(), "lock released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Lock(format!(
                "cannot remove marker {}: {e}",
                self.lock_path.display()
            ))),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.release() {
                warn!("lock release on drop failed: {e}");
            }
        }
    }
}
