//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::WardenError;
use crate::server::handlers::{
    build_handler, build_status_handler, deploy_handler, exec_handler, health_handler,
    routes_handler, stop_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Function execution
        .route("/e/{project}", any(exec_handler))
        .route("/e/{project}/{alias}", any(exec_handler))
        // Deployments
        .route("/deployments", post(deploy_handler).delete(stop_handler))
        .route("/routes", get(routes_handler))
        // Images
        .route("/images", post(build_handler))
        .route("/images/status", get(build_status_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), WardenError>>, WardenError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| WardenError::ServerError(format!("binding {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| WardenError::ServerError(e.to_string()))
    });

    Ok(handle)
}
