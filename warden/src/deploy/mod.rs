//! Deployment module: port allocation, routing, container engines and managers

pub mod docker;
pub mod engine;
pub mod manager;
pub mod ports;
pub mod routes;

pub use engine::{ContainerEngine, DockerCli};
pub use manager::{new_manager, BackendKind, DeploymentManager};
pub use routes::RouteTable;
