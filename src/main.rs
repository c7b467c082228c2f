//! Text Bounty Server
//!
//! Serves the bounty ledger over HTTP

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use text_bounty::server::{run_server, AppState};
use text_bounty::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bounty-server")]
#[command(about = "Escrowed bounties for matching external content")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Bind address (overrides config)
    #[arg(long, env = "BOUNTY_HOST")]
    host: Option<String>,

    /// Bind port (overrides config)
    #[arg(short, long, env = "BOUNTY_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting Text Bounty Server");

    let config = Config::load_from(&args.config)?;
    let state = Arc::new(AppState::from_config(&config)?);
    info!(
        "Ledger ready (owner {}, low balance policy {:?})",
        config.owner(),
        config.ledger.low_balance_policy
    );

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    run_server(&host, port, state).await?;

    Ok(())
}
