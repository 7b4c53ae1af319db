//! What an unexpected I/O error during lock acquisition means

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

/// Converts acquisition errors into "granted" or "denied".
///
/// A read-only site root grants the lock so read-only replicas keep serving
/// reads; writes then fail where they happen. A full disk grants as well so
/// the operation fails downstream instead of wedging on the lock. Anything
/// else denies.
#[derive(Clone)]
pub struct AcquireFailurePolicy {
    ensure_lock: bool,
    read_only: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl AcquireFailurePolicy {
    /// Policy consulting `probe` when access is denied
    pub fn new(probe: ReadOnlyProbe) -> Self {
        Self::with_read_only_check(move || probe.is_read_only())
    }

    pub fn with_read_only_check(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            ensure_lock: false,
            read_only: Arc::new(check),
        }
    }

    /// Never grant a lock that was not actually acquired on access errors
    pub fn strict(mut self) -> Self {
        self.ensure_lock = true;
        self
    }

    /// Whether the failed attempt should nevertheless count as acquired
    pub fn verdict(&self, lock: &str, err: &io::Error) -> bool {
        match err.kind() {
            ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => {
                if self.ensure_lock {
                    warn!(lock, error = %err, "Access denied acquiring lock");
                    return false;
                }
                let read_only = (self.read_only)();
                if read_only {
                    info!(lock, "File system is read-only, proceeding without lock");
                } else {
                    warn!(lock, error = %err, "Access denied acquiring lock");
                }
                read_only
            }
            ErrorKind::StorageFull => {
                warn!(lock, "Disk is full, proceeding without lock");
                true
            }
            _ => {
                warn!(lock, error = %err, "Unexpected error acquiring lock");
                false
            }
        }
    }
}

impl fmt::Debug for AcquireFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireFailurePolicy")
            .field("ensure_lock", &self.ensure_lock)
            .finish()
    }
}

/// Detects a read-only site root by creating a scratch file in it
#[derive(Debug, Clone)]
pub struct ReadOnlyProbe {
    root: PathBuf,
}

impl ReadOnlyProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn is_read_only(&self) -> bool {
        let probe = self
            .root
            .join(format!(".write-probe-{}", uuid::Uuid::new_v4().simple()));
        match OpenOptions::new().write(true).create_new(true).open(&probe) {
            Ok(file) => {
                drop(file);
                let _ = std::fs::remove_file(&probe);
                false
            }
            Err(e) => matches!(
                e.kind(),
                ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem
            ),
        }
    }
}
