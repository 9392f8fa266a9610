//! The gateway server: router assembly, background tasks, lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;

use webgate_browser::BrowserBackend;
use webgate_config::Config;

use crate::connection::ws_handler;
use crate::error::ServerError;
use crate::state::AppState;

/// The command-dispatch server.
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    /// Build a server over an already-connected browser backend.
    pub fn new(config: Config, backend: Arc<dyn BrowserBackend>) -> Self {
        Self {
            state: AppState::new(config, backend),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    pub fn addr(&self) -> String {
        format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        )
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Ask a running server to shut down.
    pub fn trigger_shutdown(&self) {
        let _ = self.state.shutdown.send(());
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .addr()
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;
        self.run_with_listener(listener).await
    }

    /// Serve on an existing listener (tests bind port 0 and pass it in).
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        let state = Arc::clone(&self.state);

        // Warm the pool before accepting work, then keep it warm.
        state.pool.replenish().await;
        tokio::spawn(Arc::clone(&state.pool).maintain(state.shutdown.subscribe()));
        tokio::spawn(Arc::clone(&state.sessions).reap_loop(state.shutdown.subscribe()));

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        info!("Gateway listening on {}", listener.local_addr()?);

        let mut shutdown_rx = state.shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        // Drain: session close requests queue behind in-flight commands,
        // so closing everything waits for them, bounded by the grace.
        let grace = Duration::from_secs(state.config.server.shutdown_grace_seconds);
        info!("Draining sessions for up to {:?}", grace);
        if tokio::time::timeout(grace, state.sessions.close_all())
            .await
            .is_err()
        {
            tracing::warn!("Shutdown grace expired with sessions still draining");
        }
        state.pool.drain().await;
        info!("Gateway stopped");
        Ok(())
    }
}
