//! Settings file management

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::WardenError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Warden settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Image registry configuration
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Deployment backend configuration
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Image build configuration
    #[serde(default)]
    pub build: BuildSettings,

    /// Build lock store configuration
    #[serde(default)]
    pub build_lock: BuildLockSettings,

    /// Grace period for in-flight requests on shutdown, in seconds
    #[serde(default = "default_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

fn default_grace_period() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            registry: RegistrySettings::default(),
            deploy: DeploySettings::default(),
            build: BuildSettings::default(),
            build_lock: BuildLockSettings::default(),
            shutdown_grace_period_secs: default_grace_period(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub async fn load(file: &File) -> Result<Self, WardenError> {
        if !file.exists().await {
            info!(
                "Settings file {} not found, using defaults",
                file.path().display()
            );
            return Ok(Settings::default());
        }
        file.read_json().await.map_err(|e| {
            WardenError::ConfigError(format!(
                "invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Image registry settings
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySettings {
    /// "http" or "https"
    #[serde(default = "default_registry_protocol")]
    pub protocol: String,

    #[serde(default = "default_registry_domain")]
    pub domain: String,

    /// Omitted from image references when 0, 80 or 443
    #[serde(default = "default_registry_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: Option<SecretString>,
}

fn default_registry_protocol() -> String {
    "http".to_string()
}

fn default_registry_domain() -> String {
    "localhost".to_string()
}

fn default_registry_port() -> u16 {
    5000
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            protocol: default_registry_protocol(),
            domain: default_registry_domain(),
            port: default_registry_port(),
            username: String::new(),
            password: None,
        }
    }
}

/// Deployment backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Backend type: "docker", "swarm" or "kubernetes"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Lowest port (inclusive) handed to containers
    #[serde(default = "default_port_min")]
    pub port_min: u16,

    /// Highest port (exclusive) handed to containers
    #[serde(default = "default_port_max")]
    pub port_max: u16,

    /// Host published in route entries and used for port bindings
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,

    /// Timeout for a single container engine command, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for the free port scan, in seconds
    #[serde(default = "default_port_scan_timeout")]
    pub port_scan_timeout_secs: u64,

    /// Path to the container engine CLI
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
}

fn default_backend() -> String {
    "docker".to_string()
}

fn default_port_min() -> u16 {
    40000
}

fn default_port_max() -> u16 {
    42673
}

fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

fn default_port_scan_timeout() -> u64 {
    20
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            port_min: default_port_min(),
            port_max: default_port_max(),
            advertise_host: default_advertise_host(),
            command_timeout_secs: default_command_timeout(),
            port_scan_timeout_secs: default_port_scan_timeout(),
            docker_bin: default_docker_bin(),
        }
    }
}

/// Image build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Parent of the `warden-builds` directory holding temporary clones
    /// and build contexts
    #[serde(default)]
    pub work_dir: Option<String>,

    /// Upper bound on clone, build and push, in seconds
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    /// Lifetime of a "building" record, in seconds
    #[serde(default = "default_building_ttl")]
    pub building_ttl_secs: u64,

    /// Lifetime of a failed build record, in seconds
    #[serde(default = "default_failed_ttl")]
    pub failed_ttl_secs: u64,

    /// Path to the git CLI
    #[serde(default = "default_git_bin")]
    pub git_bin: String,
}

fn default_build_timeout() -> u64 {
    10 * 60
}

fn default_building_ttl() -> u64 {
    10 * 60
}

fn default_failed_ttl() -> u64 {
    24 * 60 * 60
}

fn default_git_bin() -> String {
    "git".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            work_dir: None,
            build_timeout_secs: default_build_timeout(),
            building_ttl_secs: default_building_ttl(),
            failed_ttl_secs: default_failed_ttl(),
            git_bin: default_git_bin(),
        }
    }
}

/// Build lock store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BuildLockSettings {
    /// Process-local store
    #[default]
    Memory,

    /// Shared Redis store
    Redis {
        #[serde(default = "default_redis_url")]
        url: String,
    },
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}
