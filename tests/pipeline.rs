//! End-to-end pipeline tests over the pure stages plus a scripted exchange:
//! quote -> diff -> emit -> requote must converge, and fills must walk the
//! boundary the way the inventory math says they should.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use hypergrid::budget::RateLimitBudget;
use hypergrid::differ::compute_diff;
use hypergrid::emitter::BatchEmitter;
use hypergrid::exchange::types::{BatchStatus, CancelWire, ModifyWire, OrderWire};
use hypergrid::exchange::Exchange;
use hypergrid::grid::PricingGrid;
use hypergrid::inventory::Inventory;
use hypergrid::orchestrator::derive_boundary;
use hypergrid::quoting::compute_desired;
use hypergrid::tracker::OrderState;
use hypergrid::types::Side;

/// Acknowledges everything and hands out sequential oids.
#[derive(Default)]
struct AckExchange {
    next_oid: Mutex<u64>,
}

#[async_trait]
impl Exchange for AckExchange {
    async fn bulk_orders(&self, orders: Vec<OrderWire>) -> Result<Vec<BatchStatus>> {
        let mut next = self.next_oid.lock().unwrap();
        Ok(orders
            .iter()
            .map(|_| {
                *next += 1;
                BatchStatus::Resting { oid: *next }
            })
            .collect())
    }

    async fn bulk_modify(&self, modifies: Vec<ModifyWire>) -> Result<Vec<BatchStatus>> {
        Ok(modifies
            .iter()
            .map(|m| BatchStatus::Resting { oid: m.oid })
            .collect())
    }

    async fn bulk_cancel(&self, cancels: Vec<CancelWire>) -> Result<Vec<BatchStatus>> {
        Ok(cancels.iter().map(|_| BatchStatus::Success).collect())
    }
}

fn grid() -> PricingGrid {
    PricingGrid::new(1.0, 12, 0.003, |px| (px * 10_000.0).round() / 10_000.0).unwrap()
}

const ORDER_SZ: f64 = 10.0;

fn desired_for(grid: &PricingGrid, state: &OrderState, inv: &Inventory) -> Vec<hypergrid::types::DesiredOrder> {
    let boundary = derive_boundary(
        state.lowest_ask_level(),
        0,
        inv.allocated_token(),
        ORDER_SZ,
        grid.len(),
    );
    compute_desired(
        grid,
        boundary,
        inv.effective_token(),
        inv.effective_usdc(),
        ORDER_SZ,
        0.0,
    )
}

#[tokio::test]
async fn seeding_then_requoting_converges() {
    let grid = grid();
    let mut inv = Inventory::new(50.0, 60.0);
    inv.on_balance_update(50.0, 60.0);

    let mut state = OrderState::new();
    let mut budget = RateLimitBudget::new();
    let mut emitter = BatchEmitter::new(
        Arc::new(AckExchange::default()) as Arc<dyn Exchange>,
        "PURR/USDC",
        10_107,
        false,
    );

    // First pass: an empty book becomes all places.
    let desired = desired_for(&grid, &state, &inv);
    assert!(!desired.is_empty());
    let diff = compute_diff(&desired, &state.snapshot(), 5.0, 1.0, 1.0);
    assert_eq!(diff.places.len(), desired.len());
    assert!(diff.cancels.is_empty());

    let result = emitter.emit(diff, &mut state, &mut budget).await;
    assert_eq!(result.n_placed, desired.len());
    assert_eq!(state.len(), desired.len());

    // Second pass with unchanged inventory: nothing to do.
    let desired = desired_for(&grid, &state, &inv);
    let diff = compute_diff(&desired, &state.snapshot(), 5.0, 1.0, 1.0);
    assert!(diff.is_empty(), "requote after apply must be empty: {diff:?}");
}

#[tokio::test]
async fn ask_fill_moves_the_boundary_up() {
    let grid = grid();
    let mut inv = Inventory::new(50.0, 60.0);
    inv.on_balance_update(50.0, 60.0);

    let mut state = OrderState::new();
    let mut budget = RateLimitBudget::new();
    let mut emitter = BatchEmitter::new(
        Arc::new(AckExchange::default()) as Arc<dyn Exchange>,
        "PURR/USDC",
        10_107,
        false,
    );

    let desired = desired_for(&grid, &state, &inv);
    let boundary_before = derive_boundary(None, 0, 50.0, ORDER_SZ, grid.len());
    let diff = compute_diff(&desired, &state.snapshot(), 5.0, 1.0, 1.0);
    emitter.emit(diff, &mut state, &mut budget).await;

    // The lowest ask fills completely.
    let lowest_ask = state
        .snapshot()
        .into_iter()
        .filter(|o| o.side == Side::Sell)
        .min_by_key(|o| o.level_index)
        .expect("asks were quoted");
    let fill = state
        .on_fill(9001, lowest_ask.oid, lowest_ask.size)
        .expect("fill applies");
    assert!(fill.fully_filled);
    inv.on_ask_fill(lowest_ask.price, lowest_ask.size);
    budget.on_fill(lowest_ask.price * lowest_ask.size);

    // Boundary follows the next resting ask up, and the freed USDC becomes
    // a new bid at the old boundary level.
    let boundary_after = derive_boundary(
        state.lowest_ask_level(),
        0,
        inv.allocated_token(),
        ORDER_SZ,
        grid.len(),
    );
    assert_eq!(boundary_after, boundary_before + 1);

    let desired = desired_for(&grid, &state, &inv);
    let diff = compute_diff(&desired, &state.snapshot(), 0.0, 1.0, 1.0);
    assert!(diff
        .places
        .iter()
        .any(|o| o.side == Side::Buy && o.level_index == boundary_before));

    emitter.emit(diff, &mut state, &mut budget).await;
    let desired = desired_for(&grid, &state, &inv);
    let diff = compute_diff(&desired, &state.snapshot(), 0.0, 1.0, 1.0);
    assert!(diff.is_empty(), "book must settle after one pass: {diff:?}");

    // The fill's volume flowed back into the request budget.
    assert!(budget.cum_vlm() > 0.0);
}

#[tokio::test]
async fn duplicate_fill_replay_changes_nothing() {
    let grid = grid();
    let mut inv = Inventory::new(30.0, 0.0);
    inv.on_balance_update(30.0, 0.0);

    let mut state = OrderState::new();
    let mut budget = RateLimitBudget::new();
    let mut emitter = BatchEmitter::new(
        Arc::new(AckExchange::default()) as Arc<dyn Exchange>,
        "PURR/USDC",
        10_107,
        false,
    );

    let desired = desired_for(&grid, &state, &inv);
    let diff = compute_diff(&desired, &state.snapshot(), 5.0, 1.0, 1.0);
    emitter.emit(diff, &mut state, &mut budget).await;

    let ask = state
        .snapshot()
        .into_iter()
        .find(|o| o.side == Side::Sell)
        .unwrap();
    assert!(state.on_fill(500, ask.oid, 4.0).is_some());
    let after_first = state.snapshot();

    // A reconnect replays the same fill event.
    assert!(state.on_fill(500, ask.oid, 4.0).is_none());
    assert_eq!(state.snapshot(), after_first);
}
