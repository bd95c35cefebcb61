//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::WardenError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run warden until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), WardenError> {
    info!("Initializing warden...");
    let app_state = AppState::init(&options).await?;
    run_with_state(options, Arc::new(app_state), shutdown_signal).await
}

/// Serve an already assembled state until `shutdown_signal` resolves, then
/// shut everything down within the configured grace period
pub async fn run_with_state(
    options: AppOptions,
    app_state: Arc<AppState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), WardenError> {
    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());
    shutdown_manager.with_app_state(app_state.clone())?;

    if let Err(e) = init_server(
        &options,
        app_state,
        &mut shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await
    {
        error!("Failed to start warden: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), WardenError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(
        app_state.routes.clone(),
        app_state.manager.clone(),
        app_state.builder.clone(),
        options.execute_timeout,
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), WardenError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), WardenError> {
        if self.app_state.is_some() {
            return Err(WardenError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), WardenError>>,
    ) -> Result<(), WardenError> {
        if self.server_handle.is_some() {
            return Err(WardenError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    /// Stop the server, then the deployed instances. In-flight requests get
    /// `max_shutdown_delay` to finish before the server is forced down;
    /// instance cleanup runs either way.
    pub async fn shutdown(&mut self) -> Result<(), WardenError> {
        info!("Shutting down warden...");
        let _ = self.shutdown_tx.send(());

        // 1. Stop accepting requests, let in-flight ones finish
        let drained = match self.server_handle.take() {
            Some(handle) => self.drain_server(handle).await,
            None => Ok(()),
        };

        // 2. Stop deployed instances and clean build scratch space
        let closed = match self.app_state.take() {
            Some(state) => state.shutdown().await,
            None => Ok(()),
        };

        info!("Shutdown complete");
        drained.and(closed)
    }

    async fn drain_server(
        &self,
        mut handle: JoinHandle<Result<(), WardenError>>,
    ) -> Result<(), WardenError> {
        let delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(delay, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(WardenError::ShutdownError(format!("server task failed: {}", e))),
            Err(_) => {
                warn!(
                    "Requests still in flight after {:?}, forcing the server down",
                    delay
                );
                handle.abort();
                Ok(())
            }
        }
    }
}
