//! Deployment manager backed by a single container engine host

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::deploy::engine::{
    ContainerEngine, ContainerSpec, LABEL_ADDRESS, LABEL_IMAGE, LABEL_MANAGED,
};
use crate::deploy::manager::DeploymentManager;
use crate::deploy::ports::{find_free_port, PortRange};
use crate::deploy::routes::RouteTable;
use crate::errors::WardenError;
use crate::models::deployment::Deployment;
use crate::models::image::ImageNaming;

/// Runs one container per deployed address, published on a port from `ports`
pub struct DockerManager {
    engine: Arc<dyn ContainerEngine>,
    routes: Arc<RouteTable>,
    naming: ImageNaming,
    ports: PortRange,
    advertise_host: String,
    port_scan_timeout: Duration,
}

impl DockerManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        routes: Arc<RouteTable>,
        naming: ImageNaming,
        ports: PortRange,
        advertise_host: String,
        port_scan_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            routes,
            naming,
            ports,
            advertise_host,
            port_scan_timeout,
        }
    }

    fn spec_for(&self, deployment: &Deployment, image: &str, port: u16) -> ContainerSpec {
        let labels = BTreeMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_IMAGE.to_string(), image.to_string()),
            (LABEL_ADDRESS.to_string(), deployment.address()),
        ]);
        let env = BTreeMap::from([("PORT".to_string(), port.to_string())]);
        ContainerSpec {
            name: container_name(deployment, port),
            image: image.to_string(),
            host_ip: self.advertise_host.clone(),
            host_port: port,
            container_port: port,
            labels,
            env,
        }
    }

    async fn remove_matching(&self, image: &str, address: &str) -> Result<usize, WardenError> {
        let filters = [
            (LABEL_IMAGE.to_string(), image.to_string()),
            (LABEL_ADDRESS.to_string(), address.to_string()),
        ];
        let containers = self.engine.list_containers(&filters).await?;
        for container in &containers {
            self.engine.remove_container(&container.id).await?;
        }
        Ok(containers.len())
    }
}

#[async_trait]
impl DeploymentManager for DockerManager {
    async fn deploy_instance(&self, deployment: &Deployment) -> Result<String, WardenError> {
        let mut deployment = deployment.clone();
        deployment.validate()?;

        let address = deployment.address();
        let image = deployment.image_reference(&self.naming);
        // Whatever serves the address now, possibly an older commit
        let previous = self
            .engine
            .list_containers(&[(LABEL_ADDRESS.to_string(), address.clone())])
            .await?;
        let port = find_free_port(self.ports, self.port_scan_timeout).await?;

        let spec = self.spec_for(&deployment, &image, port);
        let id = self.engine.create_container(&spec).await?;
        if let Err(e) = self.engine.start_container(&id).await {
            if let Err(cleanup) = self.engine.remove_container(&id).await {
                warn!("Failed to remove container {} after failed start: {}", id, cleanup);
            }
            return Err(e);
        }

        let endpoint = format!("{}:{}", self.advertise_host, port);
        self.routes.set(&address, &endpoint);
        info!("Deployed {} ({}) at {}", address, image, endpoint);

        for container in previous {
            match self.engine.remove_container(&container.id).await {
                Ok(()) => info!("Replaced container {} ({})", container.id, container.image),
                Err(e) => warn!("Failed to remove replaced container {}: {}", container.id, e),
            }
        }
        Ok(endpoint)
    }

    async fn stop_instance(&self, deployment: &Deployment) -> Result<(), WardenError> {
        let mut deployment = deployment.clone();
        deployment.validate()?;

        let address = deployment.address();
        let image = deployment.image_reference(&self.naming);
        let removed = self.remove_matching(&image, &address).await;

        // The route goes away whether or not the containers did
        self.routes.delete(&address);

        let removed = removed?;
        info!("Stopped {} ({}), removed {} container(s)", address, image, removed);
        Ok(())
    }

    async fn close(&self) -> Result<(), WardenError> {
        let containers = self.engine.list_containers(&[]).await?;
        let mut removed = 0;
        for container in containers {
            if container.public_ports.iter().any(|port| self.ports.contains(*port)) {
                self.engine.remove_container(&container.id).await?;
                if let Some(address) = container.labels.get(LABEL_ADDRESS) {
                    self.routes.delete(address);
                }
                removed += 1;
            }
        }
        info!("Removed {} container(s) publishing ports in {}", removed, self.ports);
        self.engine.close().await
    }
}

/// Container names allow `[a-zA-Z0-9][a-zA-Z0-9_.-]*`
fn container_name(deployment: &Deployment, port: u16) -> String {
    let alias = if deployment.alias.is_empty() {
        "default"
    } else {
        deployment.alias.as_str()
    };
    let raw = format!("warden-{}-{}-{}", deployment.project, alias, port);
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
