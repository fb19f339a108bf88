//! guessr-server - multiplayer guessing game server

use anyhow::{Context, Result};
use clap::Parser;
use guessr::config::Config;
use guessr::server::ServerListener;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "guessr-server")]
#[command(about = "Multiplayer question and answer guessing game server")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Round time limit in seconds, overrides the config file
    #[arg(short, long)]
    time_limit: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    if let Some(secs) = cli.time_limit {
        config.game.round_time_limit_secs = secs;
    }
    config.validate().context("Invalid settings")?;

    tracing::info!(
        "Starting guessr server (round limit {}s, {} attempts per round)",
        config.game.round_time_limit_secs,
        config.game.max_attempts
    );

    let server = ServerListener::bind(config).await?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    server.run(shutdown_rx).await
}
