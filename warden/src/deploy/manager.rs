//! Deployment manager interface and backend selection

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::deploy::docker::DockerManager;
use crate::deploy::engine::ContainerEngine;
use crate::deploy::ports::PortRange;
use crate::deploy::routes::RouteTable;
use crate::errors::WardenError;
use crate::models::deployment::Deployment;
use crate::models::image::ImageNaming;
use crate::storage::settings::DeploySettings;

/// Runs and stops function instances on a backend
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    /// Start an instance of the deployment and route its address to it.
    /// Returns the endpoint the route now points at.
    async fn deploy_instance(&self, deployment: &Deployment) -> Result<String, WardenError>;

    /// Stop every instance of the deployment and remove its route
    async fn stop_instance(&self, deployment: &Deployment) -> Result<(), WardenError>;

    /// Stop everything this manager started
    async fn close(&self) -> Result<(), WardenError>;
}

/// Deployment backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Docker,
    Swarm,
    Kubernetes,
}

impl FromStr for BackendKind {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "swarm" => Ok(BackendKind::Swarm),
            "kubernetes" | "k8s" => Ok(BackendKind::Kubernetes),
            other => Err(WardenError::ConfigError(format!(
                "Unknown deploy type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Docker => "docker",
            BackendKind::Swarm => "swarm",
            BackendKind::Kubernetes => "kubernetes",
        };
        write!(f, "{}", name)
    }
}

/// Construct the deployment manager selected by `settings.backend`
pub fn new_manager(
    settings: &DeploySettings,
    naming: ImageNaming,
    engine: Arc<dyn ContainerEngine>,
    routes: Arc<RouteTable>,
) -> Result<Arc<dyn DeploymentManager>, WardenError> {
    let kind: BackendKind = settings.backend.parse()?;
    match kind {
        BackendKind::Docker => {
            let ports = PortRange::new(settings.port_min, settings.port_max);
            if ports.is_empty() {
                return Err(WardenError::ConfigError(format!(
                    "deploy port range {} is empty",
                    ports
                )));
            }
            let manager = DockerManager::new(
                engine,
                routes,
                naming,
                ports,
                settings.advertise_host.clone(),
                Duration::from_secs(settings.port_scan_timeout_secs),
            );
            Ok(Arc::new(manager))
        }
        BackendKind::Swarm | BackendKind::Kubernetes => Err(WardenError::NotImplemented(format!(
            "{} deployment backend",
            kind
        ))),
    }
}
