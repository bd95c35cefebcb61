//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::proxy::payload::EXECUTE_TIMEOUT;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{
    BuildLockSettings, BuildSettings, DeploySettings, RegistrySettings, Settings,
};

/// Directory created below a configured `build.work_dir`
pub const BUILDS_SUBDIR: &str = "warden-builds";

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    pub registry: RegistrySettings,
    pub deploy: DeploySettings,
    pub build: BuildSettings,
    pub build_lock: BuildLockSettings,

    /// Upper bound on a forwarded function call
    pub execute_timeout: Duration,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: settings.shutdown_grace_period(),
            },
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            registry: settings.registry.clone(),
            deploy: settings.deploy.clone(),
            build: settings.build.clone(),
            build_lock: settings.build_lock.clone(),
            execute_timeout: EXECUTE_TIMEOUT,
        }
    }

    /// Scratch space for clones and build contexts. A configured work dir
    /// is shared with other tenants, so builds get their own subdirectory
    /// there and only that subdirectory is removed on shutdown.
    pub fn builds_dir(&self) -> PathBuf {
        match &self.build.work_dir {
            Some(dir) => PathBuf::from(dir).join(BUILDS_SUBDIR),
            None => self.layout.builds_dir().path().to_path_buf(),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
