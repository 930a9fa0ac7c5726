//! Wire types for the Hyperliquid REST, exchange and WebSocket surfaces.
//!
//! Prices and sizes cross the wire as decimal strings; everything here
//! parses permissively (unknown fields ignored, venue-optional fields
//! defaulted) so message-shape drift degrades to log lines, not crashes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Oid, Side};

// ---------------------------------------------------------------------------
// Mutation actions (POST /exchange)
// ---------------------------------------------------------------------------

/// Field order matters: these structs are msgpack-serialized for the action
/// hash and must match the venue's canonical ordering.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWire {
    /// Asset id (spot: `spot_index + 10_000`).
    pub a: u32,
    /// Is buy.
    pub b: bool,
    /// Price, decimal string.
    pub p: String,
    /// Size, decimal string.
    pub s: String,
    /// Reduce-only.
    pub r: bool,
    /// Order type.
    pub t: OrderTypeWire,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderTypeWire {
    pub limit: LimitWire,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitWire {
    pub tif: String,
}

/// Add-liquidity-only: crossing orders are rejected, never executed.
pub const TIF_ALO: &str = "Alo";

impl OrderWire {
    pub fn new(asset_id: u32, side: Side, price: &str, size: &str) -> Self {
        Self {
            a: asset_id,
            b: side.is_buy(),
            p: price.to_string(),
            s: size.to_string(),
            r: false,
            t: OrderTypeWire {
                limit: LimitWire { tif: TIF_ALO.to_string() },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelWire {
    pub a: u32,
    pub o: Oid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModifyWire {
    pub oid: Oid,
    pub order: OrderWire,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub orders: Vec<OrderWire>,
    pub grouping: String,
}

impl OrderAction {
    pub fn new(orders: Vec<OrderWire>) -> Self {
        Self {
            kind: "order".to_string(),
            orders,
            grouping: "na".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub cancels: Vec<CancelWire>,
}

impl CancelAction {
    pub fn new(cancels: Vec<CancelWire>) -> Self {
        Self { kind: "cancel".to_string(), cancels }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModifyAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub modifies: Vec<ModifyWire>,
}

impl ModifyAction {
    pub fn new(modifies: Vec<ModifyWire>) -> Self {
        Self { kind: "batchModify".to_string(), modifies }
    }
}

// ---------------------------------------------------------------------------
// Batch responses
// ---------------------------------------------------------------------------

/// Per-slot outcome of a batch mutation, positionally aligned with the
/// request batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    /// Order is on the book (places and modifies; the oid may differ from
    /// the one targeted by a modify).
    Resting { oid: Oid },
    /// Order executed immediately (should not happen under ALO).
    Filled { oid: Oid },
    /// Plain acknowledgement (cancels).
    Success,
    /// Venue error string for this slot.
    Error(String),
}

impl BatchStatus {
    pub fn error(&self) -> Option<&str> {
        match self {
            BatchStatus::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Decode the `statuses` array of an exchange response body. A top-level
/// `status: "err"` applies its message to every slot of the batch.
pub fn parse_batch_statuses(body: &serde_json::Value, batch_len: usize) -> Vec<BatchStatus> {
    if body.get("status").and_then(|s| s.as_str()) != Some("ok") {
        let msg = body
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("exchange returned err with no message")
            .to_string();
        return vec![BatchStatus::Error(msg); batch_len];
    }

    let statuses = body
        .pointer("/response/data/statuses")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut out: Vec<BatchStatus> = statuses
        .iter()
        .map(|s| {
            if let Some(text) = s.as_str() {
                if text == "success" {
                    return BatchStatus::Success;
                }
                return BatchStatus::Error(text.to_string());
            }
            if let Some(oid) = s.pointer("/resting/oid").and_then(|o| o.as_u64()) {
                return BatchStatus::Resting { oid };
            }
            if let Some(oid) = s.pointer("/filled/oid").and_then(|o| o.as_u64()) {
                return BatchStatus::Filled { oid };
            }
            if let Some(err) = s.get("error").and_then(|e| e.as_str()) {
                return BatchStatus::Error(err.to_string());
            }
            BatchStatus::Error(format!("unrecognized status: {s}"))
        })
        .collect();

    // Short responses are venue misbehavior; pad so callers can still zip.
    while out.len() < batch_len {
        out.push(BatchStatus::Error("missing status slot".to_string()));
    }
    out
}

// ---------------------------------------------------------------------------
// Info queries (POST /info)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SpotMeta {
    pub universe: Vec<SpotPair>,
    pub tokens: Vec<SpotToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotPair {
    pub name: String,
    /// `[base_token_index, quote_token_index]`.
    pub tokens: [usize; 2],
    pub index: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotToken {
    pub name: String,
    #[serde(rename = "szDecimals")]
    pub sz_decimals: u32,
    pub index: usize,
}

impl SpotMeta {
    /// Resolve a pair by its display name ("PURR/USDC") or canonical name,
    /// returning the pair and its base token.
    pub fn find_pair(&self, coin: &str) -> Option<(&SpotPair, &SpotToken)> {
        let pair = self.universe.iter().find(|p| {
            if p.name == coin {
                return true;
            }
            self.display_name(p).as_deref() == Some(coin)
        })?;
        let base = self.tokens.iter().find(|t| t.index == pair.tokens[0])?;
        Some((pair, base))
    }

    fn display_name(&self, pair: &SpotPair) -> Option<String> {
        let base = self.tokens.iter().find(|t| t.index == pair.tokens[0])?;
        let quote = self.tokens.iter().find(|t| t.index == pair.tokens[1])?;
        Some(format!("{}/{}", base.name, quote.name))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub coin: String,
    /// "B" or "A".
    pub side: String,
    #[serde(rename = "limitPx")]
    pub limit_px: String,
    pub sz: String,
    pub oid: Oid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotBalance {
    pub coin: String,
    pub total: String,
    #[serde(default)]
    pub hold: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotUserState {
    pub balances: Vec<SpotBalance>,
}

impl SpotUserState {
    pub fn total_for(&self, coin: &str) -> Option<f64> {
        self.balances
            .iter()
            .find(|b| b.coin == coin)
            .and_then(|b| b.total.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRateLimit {
    #[serde(rename = "cumVlm")]
    pub cum_vlm: String,
    #[serde(rename = "nRequestsUsed")]
    pub n_requests_used: u64,
    #[serde(rename = "nRequestsCap", default)]
    pub n_requests_cap: u64,
}

// ---------------------------------------------------------------------------
// WebSocket stream messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WsEnvelope {
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `orderUpdates` carries status at the top of each update; the order body
/// is nested under `order`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdate {
    pub order: OrderUpdateBody,
    pub status: String,
    #[serde(rename = "statusTimestamp", default)]
    pub status_timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdateBody {
    pub coin: String,
    pub side: String,
    #[serde(rename = "limitPx")]
    pub limit_px: String,
    pub sz: String,
    pub oid: Oid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserFills {
    #[serde(rename = "isSnapshot", default)]
    pub is_snapshot: bool,
    #[serde(default)]
    pub fills: Vec<UserFill>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserFill {
    pub coin: String,
    pub px: String,
    pub sz: String,
    pub side: String,
    pub oid: Oid,
    /// Trade id: the dedup key.
    pub tid: u64,
}

/// Typed event handed from the stream task to the engine loop.
#[derive(Debug, Clone)]
pub enum WsEvent {
    OrderUpdates(Vec<OrderUpdate>),
    Fills(UserFills),
    /// Spot balances embedded in a `webData2` push.
    Balances(Vec<SpotBalance>),
    Mids(HashMap<String, String>),
    /// The feed reconnected; tracked state may have missed updates.
    Reconnected,
}

pub(crate) fn parse_f64(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}
