//! vocplay CLI - playback supervisor tooling
//!
//! Features:
//! - Media reachability probing
//! - Scenario replay against a scripted player
//! - Supervisor config validation
//! - Embed query decoding

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod scenario;

/// vocplay CLI - Playback supervisor toolkit
#[derive(Parser)]
#[command(name = "vocplay")]
#[command(author = "C3VOC")]
#[command(version)]
#[command(about = "Playback-health supervisor tooling", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a media source is reachable
    Probe {
        /// Source URL (protocol-relative URLs resolve to https)
        url: String,

        /// Probe timeout in seconds
        #[arg(short, long, default_value = "3")]
        timeout: f64,
    },

    /// Replay a scenario of player events through the supervisor
    Simulate {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Supervisor config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Telemetry collector endpoint, logs batches when unset
        #[arg(short, long)]
        endpoint: Option<url::Url>,
    },

    /// Show the effective supervisor config
    Config {
        /// Config file to load and validate
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Decode player options from an embed URL
    Options {
        /// Embed URL or query string
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    vocplay_core::init();

    match cli.command {
        Commands::Probe { url, timeout } => {
            commands::probe(&url, timeout, &cli.format).await?;
        }
        Commands::Simulate {
            scenario,
            config,
            endpoint,
        } => {
            commands::simulate(&scenario, config, endpoint, &cli.format).await?;
        }
        Commands::Config { file } => {
            commands::config(file, &cli.format)?;
        }
        Commands::Options { query } => {
            commands::options(&query, &cli.format)?;
        }
    }

    Ok(())
}
