//! MiniMirror - Main entry point
//!
//! A reverse-mirroring HTTP proxy

use anyhow::{Context, Result};
use clap::Parser;
use minimirror::{MirrorConfig, MirrorServer, Settings};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// MiniMirror - A reverse-mirroring HTTP proxy
#[derive(Parser, Debug)]
#[command(name = "minimirror")]
#[command(author = "MiniMirror Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Mirror a backend origin under this proxy's domain")]
struct Args {
    #[command(flatten)]
    settings: Settings,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Warnings and errors go to stderr, everything else to stdout
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting MiniMirror v1.0.0");

    let config = MirrorConfig::from_settings(&args.settings).context("Invalid configuration")?;
    info!("Mode: {}", config.store.mode());
    info!("Port: {}", config.port);
    if !config.replace_rules.is_empty() {
        info!("Replace rules: {}", config.replace_rules.len());
    }

    let server = Arc::new(MirrorServer::new(config)?);

    server.run().await?;

    info!("Goodbye!");

    Ok(())
}
