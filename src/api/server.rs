//! HTTP Server
//!
//! Serves the router with tracing, timeout and CORS layers, and shuts down
//! gracefully on Ctrl+C or SIGTERM.

use super::{middleware::create_cors_layer, routes::create_router};
use crate::app::App;
use crate::errors::{ConfigurationError, DuelgateResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

pub struct ApiServer {
    app: Arc<App>,
}

impl ApiServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Full middleware stack around the router
    pub fn create_app(&self) -> axum::Router {
        let config = &self.app.config.api;
        let router = create_router(self.app.clone());

        let router = if config.enable_cors {
            router.layer(create_cors_layer())
        } else {
            router
        };

        // Outermost first: tracing sees the whole request, timeouts included
        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))),
        )
    }

    fn socket_addr(&self) -> DuelgateResult<SocketAddr> {
        let config = &self.app.config.api;
        let ip = config.host.parse::<std::net::IpAddr>().map_err(|e| {
            ConfigurationError::InvalidValue {
                field: "api.host".to_string(),
                value: config.host.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(SocketAddr::from((ip, config.port)))
    }

    /// Serve until a shutdown signal arrives
    pub async fn run(self) -> DuelgateResult<()> {
        let addr = self.socket_addr()?;
        let router = self.create_app();

        let api = &self.app.config.api;
        if api.referee_api_key.is_none() {
            warn!("No referee API key configured, result ingestion is open");
        }
        if api.admin_api_key.is_none() {
            warn!("No admin API key configured, admin routes are open");
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, timeout_secs = api.request_timeout_secs, cors = api.enable_cors, "Duelgate API listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
