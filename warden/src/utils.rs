//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information for warden
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

/// Lower-case and trim a string
pub fn lower_trim(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Check if a string is empty or only whitespace
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Normalize a deployment alias. Empty and "latest" both select the default route.
pub fn normalize_alias(alias: &str) -> String {
    let alias = lower_trim(alias);
    if alias == "latest" {
        String::new()
    } else {
        alias
    }
}

/// Build the routing address `project[/alias]`
pub fn address_of(project: &str, alias: &str) -> String {
    if alias.is_empty() {
        project.to_string()
    } else {
        format!("{}/{}", project, alias)
    }
}
