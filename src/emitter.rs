//! Batch dispatch: the only path that mutates the book.
//!
//! Ordering per tick is cancel → modify → place, three batch calls at most,
//! each costing one request unit. The emitter owns the per-side cooldown
//! state machine and applies every venue response back onto the tracker, so
//! local state converges even when individual slots fail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::budget::RateLimitBudget;
use crate::differ::OrderDiff;
use crate::exchange::exec::fmt_decimal;
use crate::exchange::types::{BatchStatus, CancelWire, ModifyWire, OrderWire};
use crate::exchange::Exchange;
use crate::tracker::{OrderState, OrderStatus};
use crate::types::{DesiredOrder, Oid, Side};

/// Hard cap on individual mutations sent in one tick.
pub const MAX_MUTATIONS_PER_TICK: usize = 20;

/// Required headroom above the mutation count before anything other than
/// cancels is allowed out.
pub const BUDGET_SAFETY_MARGIN: f64 = 100.0;

const INSUFFICIENT_BALANCE_COOLDOWN: Duration = Duration::from_secs(60);
const REJECT_COOLDOWN: Duration = Duration::from_secs(10);
const MAX_CONSECUTIVE_REJECTS: u32 = 3;

const INSUFFICIENT_BALANCE_MSG: &str = "Insufficient spot balance";
const CANNOT_MODIFY_MSG: &str = "Cannot modify";
const ALO_CROSS_MSG: &str = "Post only order would have immediately matched";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmitResult {
    pub n_cancelled: usize,
    pub n_modified: usize,
    pub n_placed: usize,
    pub n_errors: usize,
    pub cancel_only_mode: bool,
}

pub struct BatchEmitter {
    exchange: Arc<dyn Exchange>,
    coin: String,
    asset_id: u32,
    dry_run: bool,
    cooldowns: HashMap<(String, Side), Instant>,
    reject_counts: HashMap<(String, Side), u32>,
}

impl BatchEmitter {
    pub fn new(exchange: Arc<dyn Exchange>, coin: &str, asset_id: u32, dry_run: bool) -> Self {
        Self {
            exchange,
            coin: coin.to_string(),
            asset_id,
            dry_run,
            cooldowns: HashMap::new(),
            reject_counts: HashMap::new(),
        }
    }

    pub fn on_cooldown(&self, side: Side) -> bool {
        self.cooldowns
            .get(&(self.coin.clone(), side))
            .is_some_and(|until| *until > Instant::now())
    }

    fn set_cooldown(&mut self, side: Side, duration: Duration) {
        self.cooldowns
            .insert((self.coin.clone(), side), Instant::now() + duration);
    }

    fn clear_cooldown(&mut self, side: Side) {
        self.cooldowns.remove(&(self.coin.clone(), side));
        self.reject_counts.remove(&(self.coin.clone(), side));
    }

    /// Count a generic place reject; three in a row trip a short cooldown.
    fn on_generic_reject(&mut self, side: Side) {
        let count = self
            .reject_counts
            .entry((self.coin.clone(), side))
            .or_insert(0);
        *count += 1;
        if *count >= MAX_CONSECUTIVE_REJECTS {
            *count = 0;
            self.set_cooldown(side, REJECT_COOLDOWN);
            warn!(coin = %self.coin, side = %side, "repeated rejects, cooling down placements");
        }
    }

    /// Apply a diff to the exchange. Venue-level failures are absorbed into
    /// counters and cooldowns; a cross-side modify is an invariant breach
    /// and panics.
    pub async fn emit(
        &mut self,
        mut diff: OrderDiff,
        state: &mut OrderState,
        budget: &mut RateLimitBudget,
    ) -> EmitResult {
        let mut result = EmitResult::default();

        // 1. Cooldown filter: sides that recently failed don't re-place yet.
        let before = diff.places.len();
        diff.places.retain(|o| !self.on_cooldown(o.side));
        if diff.places.len() != before {
            debug!(dropped = before - diff.places.len(), "places held back by cooldown");
        }

        // 2. Budget gate: without headroom, only cancels go out.
        if budget.remaining() < diff.len() as f64 + BUDGET_SAFETY_MARGIN {
            warn!(
                remaining = budget.remaining(),
                mutations = diff.len(),
                "rate-limit budget low, entering cancel-only mode"
            );
            diff.modifies.clear();
            diff.places.clear();
            result.cancel_only_mode = true;
        }

        // 3. Per-tick cap: shed places, then modifies. Cancels always run.
        while diff.len() > MAX_MUTATIONS_PER_TICK {
            if diff.places.pop().is_none() && diff.modifies.pop().is_none() {
                break;
            }
        }

        // 4. A modify must never flip an order's side; the venue silently
        // rejects those and state would diverge.
        for (oid, desired) in &diff.modifies {
            if let Some(tracked) = state.get(*oid) {
                assert_eq!(
                    tracked.side, desired.side,
                    "cross-side modify attempt on oid {oid}"
                );
            }
        }
        diff.modifies.retain(|(oid, _)| state.get(*oid).is_some());

        if self.dry_run {
            return self.emit_dry(diff, budget, result);
        }

        // 5. Dispatch: cancel -> modify -> place.
        if !diff.cancels.is_empty() {
            self.dispatch_cancels(&diff.cancels, state, budget, &mut result)
                .await;
        }
        if !diff.modifies.is_empty() {
            self.dispatch_modifies(&diff.modifies, state, budget, &mut result)
                .await;
        }
        if !diff.places.is_empty() {
            self.dispatch_places(&diff.places, state, budget, &mut result)
                .await;
        }

        result
    }

    fn emit_dry(
        &self,
        diff: OrderDiff,
        budget: &mut RateLimitBudget,
        mut result: EmitResult,
    ) -> EmitResult {
        info!(
            cancels = diff.cancels.len(),
            modifies = diff.modifies.len(),
            places = diff.places.len(),
            "dry run: batches not sent"
        );
        for n in [diff.cancels.len(), diff.modifies.len(), diff.places.len()] {
            if n > 0 {
                budget.on_request(1);
            }
        }
        result.n_cancelled = diff.cancels.len();
        result.n_modified = diff.modifies.len();
        result.n_placed = diff.places.len();
        result
    }

    async fn dispatch_cancels(
        &mut self,
        cancels: &[Oid],
        state: &mut OrderState,
        budget: &mut RateLimitBudget,
        result: &mut EmitResult,
    ) {
        for &oid in cancels {
            state.mark_pending(oid, OrderStatus::PendingCancel);
        }
        let wires = cancels
            .iter()
            .map(|&oid| CancelWire { a: self.asset_id, o: oid })
            .collect();
        let statuses = self.exchange.bulk_cancel(wires).await;
        budget.on_request(1);

        match statuses {
            Ok(statuses) => {
                for (&oid, status) in cancels.iter().zip(&statuses) {
                    // Success or error, the order is no longer ours to track:
                    // an errored cancel means it was already gone.
                    state.remove_ghost(oid);
                    match status {
                        BatchStatus::Error(e) => {
                            debug!(oid, error = %e, "cancel rejected");
                            result.n_errors += 1;
                        }
                        _ => result.n_cancelled += 1,
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "bulk cancel failed; leaving state for reconciliation");
                result.n_errors += cancels.len();
            }
        }
    }

    async fn dispatch_modifies(
        &mut self,
        modifies: &[(Oid, DesiredOrder)],
        state: &mut OrderState,
        budget: &mut RateLimitBudget,
        result: &mut EmitResult,
    ) {
        let wires = modifies
            .iter()
            .map(|(oid, o)| ModifyWire {
                oid: *oid,
                order: OrderWire::new(
                    self.asset_id,
                    o.side,
                    &fmt_decimal(o.price),
                    &fmt_decimal(o.size),
                ),
            })
            .collect();
        for (oid, _) in modifies {
            state.mark_pending(*oid, OrderStatus::PendingModify);
        }
        let statuses = self.exchange.bulk_modify(wires).await;
        budget.on_request(1);

        match statuses {
            Ok(statuses) => {
                for ((oid, want), status) in modifies.iter().zip(&statuses) {
                    match status {
                        BatchStatus::Resting { oid: new_oid }
                        | BatchStatus::Filled { oid: new_oid } => {
                            state.on_modify_response(*oid, Some(*new_oid), "resting");
                            // Price/size only move once the venue holds the
                            // new order; a rejected slot keeps the old quote.
                            state.apply_modify(*new_oid, want.price, want.size);
                            result.n_modified += 1;
                        }
                        BatchStatus::Success => {
                            state.on_modify_response(*oid, None, "resting");
                            state.apply_modify(*oid, want.price, want.size);
                            result.n_modified += 1;
                        }
                        BatchStatus::Error(e) if e.contains(CANNOT_MODIFY_MSG) => {
                            // The order is already filled or cancelled on the
                            // venue; drop our copy.
                            state.on_modify_response(*oid, None, e);
                            result.n_errors += 1;
                        }
                        BatchStatus::Error(e) => {
                            debug!(oid, error = %e, "modify rejected");
                            state.mark_pending(*oid, OrderStatus::Resting);
                            result.n_errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "bulk modify failed; leaving state for reconciliation");
                result.n_errors += modifies.len();
            }
        }
    }

    async fn dispatch_places(
        &mut self,
        places: &[DesiredOrder],
        state: &mut OrderState,
        budget: &mut RateLimitBudget,
        result: &mut EmitResult,
    ) {
        let wires = places
            .iter()
            .map(|o| {
                OrderWire::new(
                    self.asset_id,
                    o.side,
                    &fmt_decimal(o.price),
                    &fmt_decimal(o.size),
                )
            })
            .collect();
        let statuses = self.exchange.bulk_orders(wires).await;
        budget.on_request(1);

        match statuses {
            Ok(statuses) => {
                for (order, status) in places.iter().zip(&statuses) {
                    match status {
                        BatchStatus::Resting { oid } | BatchStatus::Filled { oid } => {
                            state.on_place_confirmed(
                                *oid,
                                order.side,
                                order.level_index,
                                order.price,
                                order.size,
                            );
                            self.clear_cooldown(order.side);
                            result.n_placed += 1;
                        }
                        BatchStatus::Success => {
                            // Order endpoint always returns resting/filled;
                            // a bare success means we cannot learn the oid.
                            warn!(?order, "place acknowledged without an oid");
                            result.n_placed += 1;
                        }
                        BatchStatus::Error(e) if e.contains(INSUFFICIENT_BALANCE_MSG) => {
                            warn!(side = %order.side, "insufficient balance, cooling down side");
                            self.set_cooldown(order.side, INSUFFICIENT_BALANCE_COOLDOWN);
                            result.n_errors += 1;
                        }
                        BatchStatus::Error(e) if e.contains(ALO_CROSS_MSG) => {
                            // The book moved through the level between diff
                            // and dispatch; the next tick re-quotes.
                            debug!(side = %order.side, level = order.level_index, "ALO reject");
                        }
                        BatchStatus::Error(e) => {
                            debug!(?order, error = %e, "place rejected");
                            self.on_generic_reject(order.side);
                            result.n_errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "bulk orders failed; leaving state for reconciliation");
                result.n_errors += places.len();
            }
        }
    }
}
