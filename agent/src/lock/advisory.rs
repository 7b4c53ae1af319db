//! Advisory-lock backend.
//!
//! Holds an exclusive `flock`/`LockFileEx` lock on the backing file. The OS
//! drops the lock with the descriptor, so a crashed holder releases
//! automatically.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::lock::policy::AcquireFailurePolicy;
use crate::lock::{read_lock_info, write_lock_info, LockInfo, OperationLock};

/// Attempts made when a releasing holder unlinks the file under us
const ACQUIRE_ATTEMPTS: usize = 3;

/// Lock backed by an OS advisory lock on a file
#[derive(Debug)]
pub struct AdvisoryFileLock {
    name: String,
    path: PathBuf,
    policy: AcquireFailurePolicy,
    handle: Mutex<Option<fs::File>>,
}

impl AdvisoryFileLock {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, policy: AcquireFailurePolicy) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            policy,
            handle: Mutex::new(None),
        }
    }

    /// `Ok(None)` means someone else holds the lock
    fn try_acquire(&self) -> io::Result<Option<fs::File>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..ACQUIRE_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(e) if is_contended(&e) => return Ok(None),
                Err(e) => return Err(e),
            }

            // Releasing holders unlink the file before unlocking. If we locked
            // an inode that is no longer at `path`, the lock protects nothing.
            if still_linked(&file, &self.path)? {
                return Ok(Some(file));
            }
            let _ = FileExt::unlock(&file);
        }

        Ok(None)
    }
}

impl OperationLock for AdvisoryFileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_held(&self) -> bool {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return true;
        }

        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return false,
            Err(e) => {
                debug!(lock = %self.name, error = %e, "Unable to probe lock, assuming held");
                return true;
            }
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(e) if is_contended(&e) => true,
            Err(e) => {
                debug!(lock = %self.name, error = %e, "Unable to probe lock, assuming held");
                true
            }
        }
    }

    fn lock(&self, operation: &str) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            debug!(lock = %self.name, operation, "Lock already held by this handle");
            return false;
        }

        match self.try_acquire() {
            Ok(Some(mut file)) => {
                let info = LockInfo::capture(operation);
                if let Err(e) = write_lock_info(&mut file, &info) {
                    warn!(lock = %self.name, error = %e, "Unable to record lock holder");
                }
                *handle = Some(file);
                debug!(lock = %self.name, operation, "Lock acquired");
                true
            }
            Ok(None) => {
                debug!(lock = %self.name, operation, "Lock held by another owner");
                false
            }
            Err(e) => self.policy.verdict(&self.name, &e),
        }
    }

    fn release(&self) {
        let Some(file) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        // Unlink while still locked so late openers see a different inode
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                debug!(lock = %self.name, error = %e, "Unable to delete lock file");
            }
        }
        if let Err(e) = FileExt::unlock(&file) {
            debug!(lock = %self.name, error = %e, "Unable to unlock lock file");
        }
        debug!(lock = %self.name, "Lock released");
    }

    fn lock_info(&self) -> Option<LockInfo> {
        if !self.is_held() {
            return None;
        }
        read_lock_info(&self.path)
    }
}

fn is_contended(err: &io::Error) -> bool {
    // fs2 surfaces EWOULDBLOCK/ERROR_LOCK_VIOLATION with varying kinds
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn still_linked(file: &fs::File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// Open files cannot be unlinked on Windows, so the path still names our file.
#[cfg(not(unix))]
fn still_linked(_file: &fs::File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}
