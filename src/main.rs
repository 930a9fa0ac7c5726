//! hypergrid - geometric-ladder spot market maker for Hyperliquid.
//!
//! No price oracle: the quoted boundary is a pure function of inventory,
//! so fills walk the quotes along a fixed grid the way a constant-product
//! pool walks its curve.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hypergrid::config::{Config, Secrets};
use hypergrid::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "hypergrid")]
#[command(about = "Grid market maker for Hyperliquid spot pairs")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "hypergrid.toml")]
    config: String,

    /// Log batches instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Run against testnet regardless of the config file
    #[arg(long)]
    testnet: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hypergrid=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if args.dry_run {
        config.tuning.dry_run = true;
    }
    if args.testnet {
        config.market.testnet = true;
    }

    let secrets = Secrets::from_env().context("loading credentials from environment")?;
    info!(
        coin = %config.market.coin,
        testnet = config.market.testnet,
        dry_run = config.tuning.dry_run,
        wallet = %secrets.wallet_address,
        "starting"
    );

    let orchestrator = Orchestrator::bootstrap(config, secrets)
        .await
        .context("startup seeding failed")?;

    if let Err(e) = orchestrator.run().await {
        error!(error = %e, "engine stopped");
        return Err(e);
    }
    info!("stopped");
    Ok(())
}
