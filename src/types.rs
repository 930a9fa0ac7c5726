//! Core types shared across the quoting pipeline.

use serde::{Deserialize, Serialize};

/// Exchange order id.
pub type Oid = u64;

/// Tolerance used when comparing sizes that went through float arithmetic.
pub const SIZE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Hyperliquid encodes sides as "B" (bid) and "A" (ask) on the wire.
    pub fn from_wire(s: &str) -> Option<Side> {
        match s {
            "B" => Some(Side::Buy),
            "A" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a quote slot: one order at most per `(side, level)`.
pub type LevelKey = (Side, usize);

/// An order the quoting engine wants resting on the book.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredOrder {
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
}

impl DesiredOrder {
    pub fn key(&self) -> LevelKey {
        (self.side, self.level_index)
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}
