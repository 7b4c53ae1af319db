//! Pending redeploy marker

use std::time::{Duration, SystemTime};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::storage::layout::SiteLayout;

/// Marker whose modification time records that a trigger arrived while
/// another deployment held the lock. Its content is irrelevant.
#[derive(Debug, Clone)]
pub struct PendingMarker {
    file: File,
}

impl PendingMarker {
    pub fn new(layout: &SiteLayout) -> Self {
        Self {
            file: layout.pending_marker_file(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    pub async fn ensure_exists(&self) -> Result<(), AgentError> {
        if self.file.exists().await {
            return Ok(());
        }
        self.file.write_string("").await
    }

    pub async fn last_modified(&self) -> Result<Option<SystemTime>, AgentError> {
        self.file.modified().await
    }

    /// Bump the modification time. Always moves forward, even on file systems
    /// with coarse timestamps.
    pub async fn touch(&self) -> Result<(), AgentError> {
        let now = SystemTime::now();
        let at = match self.file.modified().await? {
            Some(previous) if previous >= now => previous + Duration::from_millis(1),
            _ => now,
        };
        self.file.touch_at(at).await
    }
}
