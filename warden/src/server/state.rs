//! Server state

use std::sync::Arc;
use std::time::Duration;

use crate::build::builder::ImageBuilder;
use crate::deploy::manager::DeploymentManager;
use crate::deploy::routes::RouteTable;

/// Server state shared across handlers
pub struct ServerState {
    pub routes: Arc<RouteTable>,
    pub manager: Arc<dyn DeploymentManager>,
    pub builder: Arc<ImageBuilder>,
    /// Upper bound on a forwarded function call
    pub execute_timeout: Duration,
}

impl ServerState {
    pub fn new(
        routes: Arc<RouteTable>,
        manager: Arc<dyn DeploymentManager>,
        builder: Arc<ImageBuilder>,
        execute_timeout: Duration,
    ) -> Self {
        Self {
            routes,
            manager,
            builder,
            execute_timeout,
        }
    }
}
