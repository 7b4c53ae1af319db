//! Named cross-process locks backed by files on disk.
//!
//! Every named resource ("deployment", "status", "hooks", "ssh") has one lock
//! file under the site's `locks/` directory. Two backends exist and they are
//! NOT equivalent after a crash:
//!
//! * [`AdvisoryFileLock`] holds an OS advisory lock on the file. The kernel
//!   drops it when the holding process dies, so a crashed holder can never
//!   wedge the site. A leftover file is just a stale file.
//! * [`WatchFileLock`] treats "file exists" as "held". Nothing removes the
//!   file if the holder dies, so an orphaned file blocks the lock until it is
//!   deleted by hand or expires through [`WatchFileLock::with_max_age`].
//!   Deployments using this backend need that expiry (or another liveness
//!   check) configured.

pub mod advisory;
pub mod deployment;
pub mod operation;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod watch;

use std::backtrace::Backtrace;
use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::instance_id;

pub use advisory::AdvisoryFileLock;
pub use deployment::DeploymentLock;
pub use operation::{acquire_within, lock_operation, LockGuard};
pub use policy::{AcquireFailurePolicy, ReadOnlyProbe};
pub use queue::{AsyncLockQueue, QueueGuard};
pub use registry::LockRegistry;
pub use watch::WatchFileLock;

/// A named mutual-exclusion lock shared between processes.
///
/// Implementations are cheap, synchronous file system calls so that a
/// [`LockGuard`] can release from `Drop` on every exit path.
pub trait OperationLock: Send + Sync {
    /// Resource name, e.g. "deployment"
    fn name(&self) -> &str;

    /// Backing file
    fn path(&self) -> &Path;

    /// Whether anyone (this handle or another process) holds the lock.
    ///
    /// Never keeps the lock. Ambiguous failures report `true`.
    fn is_held(&self) -> bool;

    /// Single non-blocking acquisition attempt
    fn lock(&self, operation: &str) -> bool;

    /// Release the lock if this handle holds it. A no-op otherwise.
    fn release(&self);

    /// Who holds the lock, if anyone does
    fn lock_info(&self) -> Option<LockInfo>;
}

/// Holder metadata written into the lock file at acquire time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockInfo {
    pub operation_name: String,
    pub acquired_at: DateTime<Utc>,
    pub instance_id: String,
    pub stack_trace: String,
}

impl LockInfo {
    /// Describe the current caller as the holder of `operation`
    pub fn capture(operation: &str) -> Self {
        Self {
            operation_name: operation.to_string(),
            acquired_at: Utc::now(),
            instance_id: instance_id(),
            stack_trace: Backtrace::force_capture().to_string(),
        }
    }

    /// Parse lock file contents. Empty or foreign content yields `None`.
    pub fn parse(contents: &str) -> Option<Self> {
        let contents = contents.trim();
        if contents.is_empty() {
            return None;
        }
        serde_json::from_str(contents).ok()
    }
}

/// Replace the content of a held lock file with `info`
pub(crate) fn write_lock_info(file: &mut fs::File, info: &LockInfo) -> io::Result<()> {
    let json = serde_json::to_vec(info)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.sync_data()
}

pub(crate) fn read_lock_info(path: &Path) -> Option<LockInfo> {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| LockInfo::parse(&contents))
}
