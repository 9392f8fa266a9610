//! CLI definitions for webgate.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Webgate CLI.
#[derive(Parser)]
#[command(name = "webgate")]
#[command(about = "Semantic browser-automation gateway")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the gateway in the foreground (default)
    Run {
        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(long)]
        port: Option<u16>,

        /// Run the browser headless
        #[arg(long)]
        headless: Option<bool>,
    },

    /// Validate the configuration and exit
    CheckConfig,

    /// Generate a random API key
    GenerateKey,
}
