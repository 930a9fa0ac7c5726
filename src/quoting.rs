//! Inventory → desired ladder.
//!
//! Pure: the same `(grid, boundary, balances)` always yields the same list.
//! No price feed is consulted anywhere — the boundary level, and therefore
//! every quoted price, is a function of inventory alone.

use crate::grid::PricingGrid;
use crate::types::{DesiredOrder, Side, SIZE_EPSILON};

/// Decompose inventory into a ladder of maker orders around the boundary.
///
/// Asks climb from `boundary_level` in full tranches of `order_sz` plus at
/// most one partial; bids descend from `boundary_level - 1`, each level
/// consuming `price * order_sz` of quote until it runs out. Anything worth
/// less than `min_notional` is dropped at the end.
pub fn compute_desired(
    grid: &PricingGrid,
    boundary_level: usize,
    eff_token: f64,
    eff_usdc: f64,
    order_sz: f64,
    min_notional: f64,
) -> Vec<DesiredOrder> {
    let mut desired = Vec::new();
    if order_sz <= 0.0 || grid.is_empty() {
        return desired;
    }

    // Asks: full tranches ascending, then one partial.
    if eff_token > SIZE_EPSILON && boundary_level < grid.len() {
        let n_full = (eff_token / order_sz).floor() as usize;
        let mut level = boundary_level;
        for _ in 0..n_full {
            if level >= grid.len() {
                break;
            }
            desired.push(DesiredOrder {
                side: Side::Sell,
                level_index: level,
                price: grid.levels()[level],
                size: order_sz,
            });
            level += 1;
        }
        let partial = eff_token - n_full as f64 * order_sz;
        if partial > SIZE_EPSILON && level < grid.len() {
            desired.push(DesiredOrder {
                side: Side::Sell,
                level_index: level,
                price: grid.levels()[level],
                size: partial,
            });
        }
    }

    // Bids: descend from just below the boundary, spending quote per level.
    let mut remaining_usdc = eff_usdc;
    for level in (0..boundary_level.min(grid.len())).rev() {
        let price = grid.levels()[level];
        let cost = price * order_sz;
        if remaining_usdc >= cost {
            desired.push(DesiredOrder {
                side: Side::Buy,
                level_index: level,
                price,
                size: order_sz,
            });
            remaining_usdc -= cost;
        } else if remaining_usdc > SIZE_EPSILON {
            desired.push(DesiredOrder {
                side: Side::Buy,
                level_index: level,
                price,
                size: remaining_usdc / price,
            });
            break;
        } else {
            break;
        }
    }

    if min_notional > 0.0 {
        desired.retain(|o| o.notional() >= min_notional);
    }
    desired
}
