//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::build::builder::{BuildConfig, ImageBuilder};
use crate::build::git::{GitCli, RepoCheckout};
use crate::build::lock::{BuildLock, MemoryBuildLock, RedisBuildLock};
use crate::build::registry::{ImageRegistry, RegistryClient};
use crate::deploy::engine::{ContainerEngine, DockerCli};
use crate::deploy::manager::{new_manager, DeploymentManager};
use crate::deploy::routes::RouteTable;
use crate::errors::WardenError;
use crate::filesys::dir::Dir;
use crate::models::image::ImageNaming;
use crate::storage::settings::BuildLockSettings;

/// Main application state
pub struct AppState {
    /// Address to endpoint routes
    pub routes: Arc<RouteTable>,

    /// The one deployment manager of this process
    pub manager: Arc<dyn DeploymentManager>,

    /// Background image builds
    pub builder: Arc<ImageBuilder>,

    /// Scratch space for builds, wiped on shutdown
    pub builds_dir: Dir,
}

/// Collaborators the state is assembled from
pub struct Components {
    pub engine: Arc<dyn ContainerEngine>,
    pub registry: Arc<dyn ImageRegistry>,
    pub checkout: Arc<dyn RepoCheckout>,
    pub lock: Arc<dyn BuildLock>,
}

impl AppState {
    /// Initialize application state against the real container engine,
    /// registry, git and build lock store
    pub async fn init(options: &AppOptions) -> Result<Self, WardenError> {
        info!("Initializing application state...");

        let naming = ImageNaming::from_settings(&options.registry);
        let docker = DockerCli::new(
            options.deploy.docker_bin.clone(),
            Duration::from_secs(options.deploy.command_timeout_secs),
        );
        let version = docker.ping().await.map_err(|e| {
            WardenError::EngineError(format!("container engine is unreachable: {}", e))
        })?;
        info!("Container engine version {}", version);

        if let Some(password) = &options.registry.password {
            if !options.registry.username.is_empty() {
                docker
                    .login(&naming.host(), &options.registry.username, password)
                    .await?;
            }
        }

        let lock: Arc<dyn BuildLock> = match &options.build_lock {
            BuildLockSettings::Memory => Arc::new(MemoryBuildLock::new()),
            BuildLockSettings::Redis { url } => Arc::new(RedisBuildLock::connect(url).await?),
        };

        let components = Components {
            engine: Arc::new(docker),
            registry: Arc::new(RegistryClient::from_settings(&options.registry)?),
            checkout: Arc::new(GitCli::new(
                options.build.git_bin.clone(),
                Duration::from_secs(options.build.build_timeout_secs),
            )),
            lock,
        };
        Self::assemble(options, components)
    }

    /// Wire the state from already constructed collaborators
    pub fn assemble(options: &AppOptions, components: Components) -> Result<Self, WardenError> {
        let naming = ImageNaming::from_settings(&options.registry);
        let routes = Arc::new(RouteTable::new());
        let manager = new_manager(
            &options.deploy,
            naming.clone(),
            components.engine.clone(),
            routes.clone(),
        )?;

        let builds_dir = Dir::new(options.builds_dir());
        let config = BuildConfig {
            work_dir: builds_dir.clone(),
            build_timeout: Duration::from_secs(options.build.build_timeout_secs),
            building_ttl: Duration::from_secs(options.build.building_ttl_secs),
            failed_ttl: Duration::from_secs(options.build.failed_ttl_secs),
        };
        let builder = Arc::new(ImageBuilder::new(
            components.engine,
            components.registry,
            components.checkout,
            components.lock,
            naming,
            config,
        )?);

        Ok(Self {
            routes,
            manager,
            builder,
            builds_dir,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), WardenError> {
        info!("Shutting down application state...");

        let closed = self.manager.close().await;
        if let Err(e) = &closed {
            error!("Failed to stop deployed instances: {}", e);
        }
        if let Err(e) = self.builds_dir.delete().await {
            error!(
                "Failed to remove build directory {}: {}",
                self.builds_dir.path().display(),
                e
            );
        }
        closed
    }
}
