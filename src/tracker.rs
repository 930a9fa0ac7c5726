//! Resting-order tracker: the single source of truth for what we believe is
//! on the book.
//!
//! Orders are indexed two ways at once: by exchange oid and by quote slot
//! `(side, level_index)`. The slot index is how the differ matches desired
//! orders against live ones; the oid index is how exchange responses and
//! fills find their target. Modify responses can swap oids out from under
//! us, so re-keying must keep both indices pointing at the same record.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::types::{LevelKey, Oid, Side, SIZE_EPSILON};

/// Bound on the fill-dedup set. When full, the older (lower) half is dropped.
pub const SEEN_TIDS_CAP: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Resting,
    PendingPlace,
    PendingModify,
    PendingCancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub oid: Oid,
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
    pub status: OrderStatus,
}

impl TrackedOrder {
    pub fn key(&self) -> LevelKey {
        (self.side, self.level_index)
    }
}

/// Outcome of a non-duplicate fill against a tracked order.
#[derive(Debug, Clone, PartialEq)]
pub struct FillResult {
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub fully_filled: bool,
}

/// Split of exchange truth vs local tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// On the exchange, unknown to us. Caller should cancel these.
    pub orphaned: Vec<Oid>,
    /// Tracked locally, gone from the exchange. Caller should drop these.
    pub ghosts: Vec<Oid>,
}

/// Bounded set of trade ids already processed.
#[derive(Debug, Clone, Default)]
struct SeenTids {
    tids: BTreeSet<u64>,
}

impl SeenTids {
    /// Returns false when the tid was already present.
    fn insert(&mut self, tid: u64) -> bool {
        if !self.tids.insert(tid) {
            return false;
        }
        if self.tids.len() > SEEN_TIDS_CAP {
            // Drop the lower (older) half; tids are monotone enough for this.
            let mid = self.tids.iter().nth(self.tids.len() / 2).copied();
            if let Some(mid) = mid {
                self.tids = self.tids.split_off(&mid);
            }
        }
        true
    }

    fn contains(&self, tid: u64) -> bool {
        self.tids.contains(&tid)
    }

    fn len(&self) -> usize {
        self.tids.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderState {
    by_oid: HashMap<Oid, TrackedOrder>,
    by_key: HashMap<LevelKey, Oid>,
    seen_tids: SeenTids,
}

impl OrderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    pub fn get(&self, oid: Oid) -> Option<&TrackedOrder> {
        self.by_oid.get(&oid)
    }

    /// Lowest resting ask level, i.e. the current boundary candidate.
    pub fn lowest_ask_level(&self) -> Option<usize> {
        self.by_oid
            .values()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.level_index)
            .min()
    }

    pub fn count_side(&self, side: Side) -> usize {
        self.by_oid.values().filter(|o| o.side == side).count()
    }

    /// A place was acknowledged. Replays of the same oid are no-ops; a new
    /// oid landing on an occupied slot evicts the previous occupant.
    pub fn on_place_confirmed(
        &mut self,
        oid: Oid,
        side: Side,
        level_index: usize,
        price: f64,
        size: f64,
    ) {
        if self.by_oid.contains_key(&oid) {
            return;
        }
        let key = (side, level_index);
        if let Some(prev_oid) = self.by_key.insert(key, oid) {
            self.by_oid.remove(&prev_oid);
        }
        self.by_oid.insert(
            oid,
            TrackedOrder {
                oid,
                side,
                level_index,
                price,
                size,
                status: OrderStatus::Resting,
            },
        );
    }

    /// Apply a modify response. `new_oid` differing from `original_oid`
    /// re-keys the order (oid swap); a "Cannot modify" status means the
    /// order was already gone on the exchange and is dropped here too.
    pub fn on_modify_response(&mut self, original_oid: Oid, new_oid: Option<Oid>, status_text: &str) {
        if status_text.contains("Cannot modify") {
            self.remove_ghost(original_oid);
            return;
        }
        let Some(mut order) = self.by_oid.remove(&original_oid) else {
            return;
        };
        order.status = OrderStatus::Resting;
        let oid = match new_oid {
            Some(n) if n != original_oid => n,
            _ => original_oid,
        };
        order.oid = oid;
        self.by_key.insert(order.key(), oid);
        self.by_oid.insert(oid, order);
    }

    /// Record the price and size a confirmed modify now rests at. Only
    /// called once the venue acknowledged the new order; unknown oids are
    /// a no-op.
    pub fn apply_modify(&mut self, oid: Oid, price: f64, size: f64) {
        if let Some(order) = self.by_oid.get_mut(&oid) {
            order.price = price;
            order.size = size;
        }
    }

    pub fn mark_pending(&mut self, oid: Oid, status: OrderStatus) {
        if let Some(order) = self.by_oid.get_mut(&oid) {
            order.status = status;
        }
    }

    /// Process a fill. Duplicate tids and unknown oids return `None` and
    /// leave state untouched.
    pub fn on_fill(&mut self, tid: u64, oid: Oid, fill_sz: f64) -> Option<FillResult> {
        if self.seen_tids.contains(tid) {
            return None;
        }
        self.seen_tids.insert(tid);

        let order = self.by_oid.get_mut(&oid)?;
        if fill_sz < order.size - SIZE_EPSILON {
            order.size -= fill_sz;
            return Some(FillResult {
                side: order.side,
                price: order.price,
                size: fill_sz,
                fully_filled: false,
            });
        }
        let order = self.by_oid.remove(&oid)?;
        self.remove_key_if_current(&order);
        Some(FillResult {
            side: order.side,
            price: order.price,
            size: fill_sz,
            fully_filled: true,
        })
    }

    /// Compare exchange truth against local tracking.
    pub fn reconcile(&self, exchange_oids: &HashSet<Oid>) -> Reconciliation {
        let mut orphaned: Vec<Oid> = exchange_oids
            .iter()
            .filter(|oid| !self.by_oid.contains_key(oid))
            .copied()
            .collect();
        let mut ghosts: Vec<Oid> = self
            .by_oid
            .keys()
            .filter(|oid| !exchange_oids.contains(oid))
            .copied()
            .collect();
        orphaned.sort_unstable();
        ghosts.sort_unstable();
        Reconciliation { orphaned, ghosts }
    }

    /// Drop an order from both indices. Absent oids are a no-op.
    pub fn remove_ghost(&mut self, oid: Oid) {
        if let Some(order) = self.by_oid.remove(&oid) {
            self.remove_key_if_current(&order);
        }
    }

    /// Read-only view for the differ.
    pub fn snapshot(&self) -> Vec<TrackedOrder> {
        let mut orders: Vec<TrackedOrder> = self.by_oid.values().cloned().collect();
        orders.sort_by_key(|o| (o.side, o.level_index));
        orders
    }

    /// Only clear the slot if it still points at this order; the slot may
    /// already belong to a replacement.
    fn remove_key_if_current(&mut self, order: &TrackedOrder) {
        if self.by_key.get(&order.key()) == Some(&order.oid) {
            self.by_key.remove(&order.key());
        }
    }

    #[cfg(test)]
    fn assert_indices_consistent(&self) {
        for (oid, order) in &self.by_oid {
            assert_eq!(order.oid, *oid, "oid field diverged from index");
            assert_eq!(
                self.by_key.get(&order.key()),
                Some(oid),
                "by_key missing entry for {:?}",
                order
            );
        }
        for (key, oid) in &self.by_key {
            let order = self.by_oid.get(oid).expect("dangling by_key oid");
            assert_eq!(&order.key(), key, "by_key points at wrong slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(state: &mut OrderState, oid: Oid, side: Side, level: usize) {
        state.on_place_confirmed(oid, side, level, 1.0 + level as f64 * 0.003, 10.0);
    }

    #[test]
    fn place_confirm_populates_both_indices() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Sell, 2);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(7).unwrap().level_index, 2);
        s.assert_indices_consistent();
    }

    #[test]
    fn place_confirm_is_idempotent_on_oid_replay() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Sell, 2);
        place(&mut s, 7, Side::Sell, 2);
        assert_eq!(s.len(), 1);
        s.assert_indices_consistent();
    }

    #[test]
    fn replacement_at_same_slot_evicts_prior_oid() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Sell, 2);
        place(&mut s, 9, Side::Sell, 2);
        assert_eq!(s.len(), 1);
        assert!(s.get(7).is_none());
        assert_eq!(s.get(9).unwrap().level_index, 2);
        s.assert_indices_consistent();
    }

    #[test]
    fn modify_response_swaps_oid_atomically() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Buy, 1);
        s.on_modify_response(7, Some(11), "resting");
        assert!(s.get(7).is_none());
        let order = s.get(11).unwrap();
        assert_eq!(order.oid, 11);
        assert_eq!(order.key(), (Side::Buy, 1));
        s.assert_indices_consistent();
    }

    #[test]
    fn modify_response_same_oid_is_noop_on_replay() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Buy, 1);
        s.on_modify_response(7, Some(7), "resting");
        let before = s.snapshot();
        s.on_modify_response(7, Some(7), "resting");
        assert_eq!(s.snapshot(), before);
        s.assert_indices_consistent();
    }

    #[test]
    fn apply_modify_updates_quote_in_place() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Buy, 1);
        s.apply_modify(7, 1.010, 12.0);
        let order = s.get(7).unwrap();
        assert_eq!(order.price, 1.010);
        assert_eq!(order.size, 12.0);
        assert_eq!(order.key(), (Side::Buy, 1));
        // Unknown oids are ignored.
        s.apply_modify(42, 9.9, 9.9);
        assert!(s.get(42).is_none());
        s.assert_indices_consistent();
    }

    #[test]
    fn cannot_modify_removes_ghost() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Buy, 1);
        s.on_modify_response(7, None, "Cannot modify canceled or filled order");
        assert!(s.is_empty());
        // Tolerates absence on replay.
        s.on_modify_response(7, None, "Cannot modify canceled or filled order");
        s.assert_indices_consistent();
    }

    #[test]
    fn modify_response_unknown_oid_is_noop() {
        let mut s = OrderState::new();
        s.on_modify_response(42, Some(43), "resting");
        assert!(s.is_empty());
    }

    #[test]
    fn full_fill_removes_partial_fill_shrinks() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Sell, 2);

        let partial = s.on_fill(1001, 7, 4.0).unwrap();
        assert!(!partial.fully_filled);
        assert_eq!(partial.size, 4.0);
        assert_eq!(s.get(7).unwrap().size, 6.0);
        s.assert_indices_consistent();

        let full = s.on_fill(1002, 7, 6.0).unwrap();
        assert!(full.fully_filled);
        assert_eq!(full.side, Side::Sell);
        assert!(s.is_empty());
        s.assert_indices_consistent();
    }

    #[test]
    fn duplicate_tid_returns_none_and_keeps_state() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Sell, 2);
        assert!(s.on_fill(1001, 7, 4.0).is_some());
        assert!(s.on_fill(1001, 7, 4.0).is_none());
        assert_eq!(s.get(7).unwrap().size, 6.0);
    }

    #[test]
    fn fill_for_unknown_oid_returns_none() {
        let mut s = OrderState::new();
        assert!(s.on_fill(1001, 99, 4.0).is_none());
        // The tid is still burned: a later replay is also a duplicate.
        place(&mut s, 99, Side::Buy, 0);
        assert!(s.on_fill(1001, 99, 4.0).is_none());
    }

    #[test]
    fn seen_tids_prunes_older_half_at_cap() {
        let mut seen = SeenTids::default();
        for tid in 0..=(SEEN_TIDS_CAP as u64) {
            seen.insert(tid);
        }
        assert!(seen.len() <= SEEN_TIDS_CAP);
        // Newest survive, oldest were dropped.
        assert!(seen.contains(SEEN_TIDS_CAP as u64));
        assert!(!seen.contains(0));
    }

    #[test]
    fn reconcile_splits_orphans_and_ghosts() {
        let mut s = OrderState::new();
        place(&mut s, 1, Side::Buy, 0);
        place(&mut s, 2, Side::Sell, 3);

        let exchange: HashSet<Oid> = [2, 5].into_iter().collect();
        let rec = s.reconcile(&exchange);
        assert_eq!(rec.orphaned, vec![5]);
        assert_eq!(rec.ghosts, vec![1]);
    }

    #[test]
    fn remove_ghost_is_idempotent() {
        let mut s = OrderState::new();
        place(&mut s, 1, Side::Buy, 0);
        s.remove_ghost(1);
        s.remove_ghost(1);
        assert!(s.is_empty());
        s.assert_indices_consistent();
    }

    #[test]
    fn remove_ghost_leaves_replacement_slot_alone() {
        let mut s = OrderState::new();
        place(&mut s, 7, Side::Sell, 2);
        place(&mut s, 9, Side::Sell, 2);
        // 7 was evicted by 9; a stale removal for 7 must not clear 9's slot.
        s.remove_ghost(7);
        assert_eq!(s.get(9).unwrap().level_index, 2);
        s.assert_indices_consistent();
    }

    #[test]
    fn lowest_ask_level_ignores_bids() {
        let mut s = OrderState::new();
        place(&mut s, 1, Side::Buy, 0);
        assert_eq!(s.lowest_ask_level(), None);
        place(&mut s, 2, Side::Sell, 5);
        place(&mut s, 3, Side::Sell, 3);
        assert_eq!(s.lowest_ask_level(), Some(3));
    }
}
