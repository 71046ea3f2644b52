use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use confidant_agents::Orchestrator;
use confidant_common::{Error, Result};
use confidant_config::AppConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// The HTTP front door: owns the config and orchestrator until `run`.
pub struct GatewayServer {
    config: AppConfig,
    orchestrator: Arc<Orchestrator>,
}

impl GatewayServer {
    pub fn new(config: AppConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn router(&self) -> Result<Router> {
        build_router(Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.orchestrator),
        )))
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Gateway(format!("failed to bind {addr}: {e}")))?;
        info!("gateway listening on {addr}");

        let router = self.router()?;
        serve(listener, router, shutdown_signal()).await
    }
}

/// Serve `router` on an already bound listener. Peer addresses are exposed to
/// the rate limiter.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| Error::Gateway(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
