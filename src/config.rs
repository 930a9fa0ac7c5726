//! TOML configuration + environment secrets.
//!
//! The config file describes the market and strategy only. Credentials
//! never live in it: the signing key and wallet address come from the
//! environment (via `.env` in development).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub market: MarketConfig,
    pub strategy: StrategyConfig,
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Spot pair, e.g. "PURR/USDC".
    pub coin: String,
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Price of grid level 0.
    pub start_px: f64,
    /// Number of grid levels.
    pub n_orders: usize,
    /// Full tranche size in base token.
    pub order_sz: f64,
    /// Optional operator seed for the initial boundary when no asks are
    /// resting; 0 means derive it from the allocation.
    #[serde(default)]
    pub n_seeded_levels: usize,
    /// Geometric level spacing.
    #[serde(default = "default_tick")]
    pub tick: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Base-token ceiling this instance may deploy.
    pub token: f64,
    /// USDC ceiling this instance may deploy.
    pub usdc: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default = "default_interval_s")]
    pub interval_s: f64,
    #[serde(default = "default_dead_zone_bps")]
    pub dead_zone_bps: f64,
    #[serde(default = "default_price_tolerance_bps")]
    pub price_tolerance_bps: f64,
    #[serde(default = "default_size_tolerance_pct")]
    pub size_tolerance_pct: f64,
    #[serde(default = "default_reconcile_every")]
    pub reconcile_every: u64,
    #[serde(default)]
    pub min_notional: f64,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_tick() -> f64 {
    crate::grid::DEFAULT_TICK
}

fn default_interval_s() -> f64 {
    3.0
}

fn default_dead_zone_bps() -> f64 {
    5.0
}

fn default_price_tolerance_bps() -> f64 {
    1.0
}

fn default_size_tolerance_pct() -> f64 {
    1.0
}

fn default_reconcile_every() -> u64 {
    20
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            interval_s: default_interval_s(),
            dead_zone_bps: default_dead_zone_bps(),
            price_tolerance_bps: default_price_tolerance_bps(),
            size_tolerance_pct: default_size_tolerance_pct(),
            reconcile_every: default_reconcile_every(),
            min_notional: 0.0,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.strategy.start_px > 0.0, "strategy.start_px must be positive");
        anyhow::ensure!(self.strategy.n_orders > 0, "strategy.n_orders must be positive");
        anyhow::ensure!(self.strategy.order_sz > 0.0, "strategy.order_sz must be positive");
        anyhow::ensure!(self.strategy.tick > 0.0, "strategy.tick must be positive");
        anyhow::ensure!(
            self.tuning.interval_s > 0.0,
            "tuning.interval_s must be positive"
        );
        anyhow::ensure!(
            self.tuning.reconcile_every > 0,
            "tuning.reconcile_every must be positive"
        );
        Ok(())
    }
}

/// Credentials, environment-only.
#[derive(Clone)]
pub struct Secrets {
    pub private_key: String,
    pub wallet_address: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("private_key", &"[REDACTED]")
            .field("wallet_address", &self.wallet_address)
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let private_key = std::env::var("HYPERLIQUID_PRIVATE_KEY")
            .context("HYPERLIQUID_PRIVATE_KEY not set")?;
        let wallet_address = std::env::var("HYPERLIQUID_WALLET_ADDRESS")
            .context("HYPERLIQUID_WALLET_ADDRESS not set")?;
        Ok(Self { private_key, wallet_address })
    }
}
