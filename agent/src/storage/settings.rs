//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Site settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Whether source-control triggered deployments are accepted
    #[serde(default = "default_true")]
    pub scm_enabled: bool,

    /// Package the site runs from. A URL means the site content is a remote
    /// immutable package; `"1"` means a locally deployed package.
    #[serde(default)]
    pub run_from_package: Option<String>,

    /// Branch deployed when a trigger does not name one
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Repository fetched when a trigger does not name one
    #[serde(default)]
    pub repository_url: Option<String>,

    /// Command run in the repository to build the site
    #[serde(default)]
    pub build_command: Option<String>,

    /// Command run after a successful build to publish the site
    #[serde(default)]
    pub deploy_command: Option<String>,

    /// Slot swapped into after a successful continuous deployment
    #[serde(default)]
    pub auto_swap_slot: Option<String>,

    /// Lock implementation
    #[serde(default)]
    pub lock_backend: LockBackend,

    /// Age after which a watch-based lock file is treated as orphaned
    #[serde(default)]
    pub watch_lock_max_age_secs: Option<u64>,

    /// How long status writes wait for the status lock
    #[serde(default = "default_status_lock_timeout")]
    pub status_lock_timeout_secs: u64,

    /// Status notification endpoint
    #[serde(default)]
    pub notification: NotificationSettings,

    /// Background deployment tracking
    #[serde(default)]
    pub background: BackgroundSettings,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_status_lock_timeout() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            scm_enabled: true,
            run_from_package: None,
            branch: default_branch(),
            repository_url: None,
            build_command: None,
            deploy_command: None,
            auto_swap_slot: None,
            lock_backend: LockBackend::default(),
            watch_lock_max_age_secs: None,
            status_lock_timeout_secs: default_status_lock_timeout(),
            notification: NotificationSettings::default(),
            background: BackgroundSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// True when the site content comes from a remote package URL
    pub fn run_from_remote_zip(&self) -> bool {
        self.run_from_package
            .as_deref()
            .map(str::trim)
            .is_some_and(|value| !value.is_empty() && value != "1")
    }

    pub fn status_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.status_lock_timeout_secs)
    }

    pub fn watch_lock_max_age(&self) -> Option<Duration> {
        self.watch_lock_max_age_secs.map(Duration::from_secs)
    }
}

/// Lock implementation selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Advisory locks where the platform has them, otherwise watch-based
    #[default]
    Auto,
    Advisory,
    Watch,
}

/// Status notification endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Base URL of the hosting front end. Notifications are off when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent with notifications
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            retry_count: default_retry_count(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Background deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundSettings {
    /// How often the liveness marker is rewritten
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,

    /// How long a background deployment is tracked before the marker is left stale
    #[serde(default = "default_max_tracked")]
    pub max_tracked_secs: u64,
}

fn default_liveness_interval() -> u64 {
    10
}

fn default_max_tracked() -> u64 {
    30 * 60
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            liveness_interval_secs: default_liveness_interval(),
            max_tracked_secs: default_max_tracked(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8181
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
