//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A concrete revision of the site's source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Commit id, or a generated id for placeholder deployments
    pub id: String,

    pub author_name: Option<String>,

    pub author_email: Option<String>,

    pub message: Option<String>,

    pub timestamp: DateTime<Utc>,

    /// Placeholder created before the real revision is known
    #[serde(default)]
    pub is_temporary: bool,
}

impl ChangeSet {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author_name: None,
            author_email: None,
            message: None,
            timestamp: Utc::now(),
            is_temporary: false,
        }
    }

    pub fn with_author(mut self, name: impl Into<String>, email: Option<String>) -> Self {
        self.author_name = Some(name.into());
        self.author_email = email;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn temporary(mut self) -> Self {
        self.is_temporary = true;
        self
    }

    /// Case-insensitive id comparison, as commit ids may differ in case
    /// between sources
    pub fn is_same_revision(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }
}
