//! Tracing setup and server bootstrap.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use webgate_browser::{ChromeBackend, ChromeConfig};
use webgate_config::Config;
use webgate_server::GatewayServer;

/// Initialize console tracing; `RUST_LOG` overrides the default level.
pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,webgate=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Launch the browser backend and serve until SIGINT/SIGTERM.
pub(crate) async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let backend = Arc::new(
        ChromeBackend::launch(ChromeConfig {
            headless: config.browser.headless,
            executable: config.browser.chrome_executable.clone().map(PathBuf::from),
            debug_port: config.browser.debug_port,
            profile_dir: None,
        })
        .await?,
    );

    let backend_dyn: Arc<dyn webgate_browser::BrowserBackend> = backend.clone();
    let server = Arc::new(GatewayServer::new(config, backend_dyn));

    let shutdown_trigger = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown_trigger.trigger_shutdown();
    });

    server.run().await?;
    backend.shutdown().await?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
