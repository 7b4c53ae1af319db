//! Utility functions

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Environment variable carrying the hosting platform's worker instance id
pub const INSTANCE_ID_ENV: &str = "WEBSITE_INSTANCE_ID";

/// Version information for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Identifier of this worker instance, recorded in lock files.
///
/// Several instances may share one site root over a network file system, so
/// the platform-provided instance id wins over the host name.
pub fn instance_id() -> String {
    std::env::var(INSTANCE_ID_ENV)
        .ok()
        .filter(|id| !id.trim().is_empty())
        .or_else(System::host_name)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a short id for temporary deployments
pub fn generate_temp_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("temp-{}", &uuid[..8])
}
