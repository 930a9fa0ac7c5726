//! Desired vs live: the minimum mutation set.
//!
//! Two filters keep quiescent ticks silent. The dead zone compares the
//! size-weighted mean price of both books and suppresses the whole tick
//! when drift is below threshold; per-slot tolerances then drop matched
//! pairs whose price and size barely moved.

use std::collections::{BTreeSet, HashMap};

use crate::tracker::TrackedOrder;
use crate::types::{DesiredOrder, LevelKey, Oid};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDiff {
    pub modifies: Vec<(Oid, DesiredOrder)>,
    pub places: Vec<DesiredOrder>,
    pub cancels: Vec<Oid>,
}

impl OrderDiff {
    pub fn is_empty(&self) -> bool {
        self.modifies.is_empty() && self.places.is_empty() && self.cancels.is_empty()
    }

    /// Total individual mutations.
    pub fn len(&self) -> usize {
        self.modifies.len() + self.places.len() + self.cancels.len()
    }
}

/// Size-weighted mean price; `None` for an empty or zero-size book side.
fn weighted_mid(prices_sizes: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let (mut notional, mut size) = (0.0, 0.0);
    for (px, sz) in prices_sizes {
        notional += px * sz;
        size += sz;
    }
    if size > 0.0 {
        Some(notional / size)
    } else {
        None
    }
}

pub fn compute_diff(
    desired: &[DesiredOrder],
    current: &[TrackedOrder],
    dead_zone_bps: f64,
    price_tol_bps: f64,
    size_tol_pct: f64,
) -> OrderDiff {
    // Dead zone only applies when both books exist; an empty side always
    // passes through so seeding and unwinding are never suppressed.
    if !desired.is_empty() && !current.is_empty() {
        let desired_mid = weighted_mid(desired.iter().map(|o| (o.price, o.size)));
        let current_mid = weighted_mid(current.iter().map(|o| (o.price, o.size)));
        if let (Some(d), Some(c)) = (desired_mid, current_mid) {
            let drift_bps = ((d - c) / c).abs() * 10_000.0;
            if drift_bps < dead_zone_bps {
                return OrderDiff::default();
            }
        }
    }

    let desired_by_key: HashMap<LevelKey, &DesiredOrder> =
        desired.iter().map(|o| (o.key(), o)).collect();
    let current_by_key: HashMap<LevelKey, &TrackedOrder> =
        current.iter().map(|o| (o.key(), o)).collect();

    // Sorted union of keys keeps the output order stable across runs.
    let keys: BTreeSet<LevelKey> = desired_by_key
        .keys()
        .chain(current_by_key.keys())
        .copied()
        .collect();

    let mut diff = OrderDiff::default();
    for key in keys {
        match (desired_by_key.get(&key), current_by_key.get(&key)) {
            (Some(want), Some(have)) => {
                let price_delta_bps = ((want.price - have.price) / have.price).abs() * 10_000.0;
                let size_delta_pct = ((want.size - have.size) / have.size).abs() * 100.0;
                if price_delta_bps < price_tol_bps && size_delta_pct < size_tol_pct {
                    continue;
                }
                // Keys carry the side, so a matched pair can never cross.
                debug_assert_eq!(want.side, have.side);
                diff.modifies.push((have.oid, (*want).clone()));
            }
            (Some(want), None) => diff.places.push((*want).clone()),
            (None, Some(have)) => diff.cancels.push(have.oid),
            (None, None) => unreachable!("key came from one of the maps"),
        }
    }
    diff
}
