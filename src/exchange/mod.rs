//! Everything that touches the network: REST info queries, signed batch
//! mutations, and the WebSocket feed.

pub mod exec;
pub mod info;
pub mod signer;
pub mod types;
pub mod ws;

use anyhow::Result;
use async_trait::async_trait;

use types::{BatchStatus, CancelWire, ModifyWire, OrderWire};

pub const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";
pub const TESTNET_API_URL: &str = "https://api.hyperliquid-testnet.xyz";
pub const MAINNET_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
pub const TESTNET_WS_URL: &str = "wss://api.hyperliquid-testnet.xyz/ws";

/// Spot asset ids live above this offset.
pub const SPOT_ASSET_OFFSET: u32 = 10_000;

/// Batch mutation surface. One call is one request unit against the venue
/// rate limit, regardless of batch size.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn bulk_orders(&self, orders: Vec<OrderWire>) -> Result<Vec<BatchStatus>>;
    async fn bulk_modify(&self, modifies: Vec<ModifyWire>) -> Result<Vec<BatchStatus>>;
    async fn bulk_cancel(&self, cancels: Vec<CancelWire>) -> Result<Vec<BatchStatus>>;
}
