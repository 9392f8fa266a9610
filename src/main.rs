//! Webgate - semantic browser-automation gateway.
//!
//! Main entry point for the webgate CLI and server.

mod bootstrap;
mod cli;

use clap::Parser;
use rand::RngCore;
use tracing::info;

use webgate_config::ConfigLoader;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let cli = Cli::parse();

    // A config file the user pointed at must load; a broken file is an
    // error, not a silent fall-back to defaults.
    let config = match &cli.config {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::from_env()?,
    };
    info!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    match cli.command {
        None => bootstrap::run_server(config).await,
        Some(Commands::Run { host, port, headless }) => {
            // CLI args override config values.
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(headless) = headless {
                config.browser.headless = headless;
            }
            bootstrap::run_server(config).await
        }
        Some(Commands::CheckConfig) => {
            config.validate()?;
            println!("Configuration OK");
            Ok(())
        }
        Some(Commands::GenerateKey) => {
            let mut bytes = [0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            println!("{}", hex::encode(bytes));
            Ok(())
        }
    }
}
