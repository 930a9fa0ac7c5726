//! Wiring and time: startup seeding, the tick loop, reconciliation, and
//! WebSocket event routing.
//!
//! All mutable engine state lives on this task. Stream events arrive over a
//! channel and are applied inline between ticks, so no handler ever races a
//! tick and nothing needs a lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::budget::RateLimitBudget;
use crate::config::{Config, Secrets};
use crate::differ::{compute_diff, OrderDiff};
use crate::emitter::BatchEmitter;
use crate::exchange::exec::ExchangeClient;
use crate::exchange::info::InfoClient;
use crate::exchange::signer::Signer;
use crate::exchange::types::{parse_f64, SpotBalance, UserFill, WsEvent};
use crate::exchange::ws::WsFeed;
use crate::exchange::{
    Exchange, MAINNET_API_URL, MAINNET_WS_URL, SPOT_ASSET_OFFSET, TESTNET_API_URL, TESTNET_WS_URL,
};
use crate::grid::{round_to_sig_figs, PricingGrid};
use crate::inventory::Inventory;
use crate::quoting::compute_desired;
use crate::tracker::OrderState;
use crate::types::Side;

/// Venue price rule: five significant figures.
const PX_SIG_FIGS: i32 = 5;

/// Spot prices may carry at most `8 - szDecimals` decimals.
const PX_DECIMAL_BASE: i32 = 8;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct Orchestrator {
    cfg: Config,
    user: String,
    info: InfoClient,
    grid: PricingGrid,
    inventory: Inventory,
    state: OrderState,
    budget: RateLimitBudget,
    emitter: BatchEmitter,
    ws: Arc<WsFeed>,
    events: mpsc::Receiver<WsEvent>,
    /// Names the venue may use for our pair ("PURR/USDC" and "@index").
    coin_aliases: HashSet<String>,
    token_name: String,
    tick_count: u64,
    force_reconcile: bool,
    last_exchange_orders: usize,
}

impl Orchestrator {
    /// Resolve metadata, seed every piece of local state from REST, and
    /// only then open the stream subscriptions.
    pub async fn bootstrap(cfg: Config, secrets: Secrets) -> Result<Self> {
        let (api_url, ws_url) = if cfg.market.testnet {
            (TESTNET_API_URL, TESTNET_WS_URL)
        } else {
            (MAINNET_API_URL, MAINNET_WS_URL)
        };

        let info = InfoClient::new(api_url)?;
        let meta = info.spot_meta().await.context("fetching spot metadata")?;
        let (pair, base_token) = meta
            .find_pair(&cfg.market.coin)
            .ok_or_else(|| anyhow!("pair {} not found in spot metadata", cfg.market.coin))?;
        let asset_id = pair.index + SPOT_ASSET_OFFSET;
        let token_name = base_token.name.clone();
        let mut coin_aliases = HashSet::new();
        coin_aliases.insert(cfg.market.coin.clone());
        coin_aliases.insert(pair.name.clone());
        coin_aliases.insert(format!("@{}", pair.index));

        let max_decimals = PX_DECIMAL_BASE - base_token.sz_decimals as i32;
        let grid = PricingGrid::new(
            cfg.strategy.start_px,
            cfg.strategy.n_orders,
            cfg.strategy.tick,
            |px| round_to_sig_figs(px, PX_SIG_FIGS, max_decimals),
        )?;
        info!(
            coin = %cfg.market.coin,
            asset_id,
            levels = grid.len(),
            lo = grid.levels()[0],
            hi = grid.levels()[grid.len() - 1],
            "grid constructed"
        );

        let user = secrets.wallet_address.clone();
        let mut state = OrderState::new();
        let open = info
            .open_orders(&user)
            .await
            .context("seeding open orders")?;
        let mut seeded = 0;
        for order in &open {
            if !coin_aliases.contains(&order.coin) {
                continue;
            }
            let Some(side) = Side::from_wire(&order.side) else {
                continue;
            };
            let px = parse_f64(&order.limit_px);
            let Some(level) = grid.level_for_price(px) else {
                warn!(oid = order.oid, px, "resting order off-grid; reconciliation will cancel it");
                continue;
            };
            state.on_place_confirmed(order.oid, side, level, px, parse_f64(&order.sz));
            seeded += 1;
        }
        info!(seeded, total_open = open.len(), "order state seeded");

        let mut inventory = Inventory::new(cfg.allocation.token, cfg.allocation.usdc);
        let balances = info
            .spot_user_state(&user)
            .await
            .context("seeding balances")?;
        inventory.on_balance_update(
            balances.total_for(&token_name).unwrap_or(0.0),
            balances.total_for("USDC").unwrap_or(0.0),
        );
        info!(
            token = inventory.account_token(),
            usdc = inventory.account_usdc(),
            "balances seeded"
        );

        let mut budget = RateLimitBudget::new();
        let limits = info
            .user_rate_limit(&user)
            .await
            .context("seeding rate limit budget")?;
        budget.sync_from_exchange(parse_f64(&limits.cum_vlm), limits.n_requests_used);

        let signer = Signer::new(&secrets.private_key, cfg.market.testnet)?;
        let exchange: Arc<dyn Exchange> = Arc::new(ExchangeClient::new(api_url, signer)?);
        let emitter = BatchEmitter::new(
            exchange,
            &cfg.market.coin,
            asset_id,
            cfg.tuning.dry_run,
        );

        // State is seeded; subscriptions may start flowing now.
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let ws = WsFeed::spawn(ws_url, &user, &cfg.market.coin, events_tx);

        let last_exchange_orders = open.len();
        Ok(Self {
            cfg,
            user,
            info,
            grid,
            inventory,
            state,
            budget,
            emitter,
            ws,
            events,
            coin_aliases,
            token_name,
            tick_count: 0,
            force_reconcile: false,
            last_exchange_orders,
        })
    }

    /// Main loop. Returns on ctrl-c or when the stream task dies with a
    /// closed channel.
    pub async fn run(mut self) -> Result<()> {
        let tick_period = Duration::from_secs_f64(self.cfg.tuning.interval_s);
        let mut ticker = interval(tick_period);
        // A slow emit pushes the next tick back instead of skipping it.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_s = self.cfg.tuning.interval_s,
            reconcile_every = self.cfg.tuning.reconcile_every,
            dry_run = self.cfg.tuning.dry_run,
            "starting quote loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_count += 1;
                    let started = Instant::now();
                    self.tick().await;
                    let elapsed = started.elapsed();
                    if elapsed > tick_period {
                        warn!(?elapsed, "tick overran its interval");
                    }
                    if self.tick_count % self.cfg.tuning.reconcile_every == 0 {
                        self.force_reconcile = true;
                    }
                    self.maybe_reconcile().await;
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return Err(anyhow!("websocket event channel closed"));
                    };
                    self.on_ws_event(event);
                    self.maybe_reconcile().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    async fn maybe_reconcile(&mut self) {
        if !self.force_reconcile {
            return;
        }
        self.force_reconcile = false;
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "reconciliation failed; will retry next cycle");
            // Keep the flag down: the periodic timer re-arms it.
        }
    }

    /// One pipeline pass: inventory -> desired -> diff -> emit. Transport
    /// failures surface as error counters; the loop always continues.
    async fn tick(&mut self) {
        let boundary = self.boundary_level();
        let desired = compute_desired(
            &self.grid,
            boundary,
            self.inventory.effective_token(),
            self.inventory.effective_usdc(),
            self.cfg.strategy.order_sz,
            self.cfg.tuning.min_notional,
        );
        let current = self.state.snapshot();
        let diff = compute_diff(
            &desired,
            &current,
            self.cfg.tuning.dead_zone_bps,
            self.cfg.tuning.price_tolerance_bps,
            self.cfg.tuning.size_tolerance_pct,
        );

        if diff.is_empty() {
            debug!(boundary, desired = desired.len(), "quiescent tick");
        } else {
            debug!(
                boundary,
                cancels = diff.cancels.len(),
                modifies = diff.modifies.len(),
                places = diff.places.len(),
                "applying diff"
            );
        }

        let result = self
            .emitter
            .emit(diff, &mut self.state, &mut self.budget)
            .await;

        info!(
            ratio = %format!("{:.2}", self.budget.ratio()),
            budget = self.budget.remaining(),
            vol = self.budget.cum_vlm(),
            reqs = self.budget.n_requests(),
            state_orders = self.state.len(),
            exchange_orders = self.last_exchange_orders,
            cancelled = result.n_cancelled,
            modified = result.n_modified,
            placed = result.n_placed,
            errors = result.n_errors,
            cancel_only = result.cancel_only_mode,
            "tick"
        );
        if self.budget.is_emergency() {
            warn!(
                remaining = self.budget.remaining(),
                "rate-limit budget nearly exhausted"
            );
        } else if !self.budget.is_healthy() {
            warn!(ratio = self.budget.ratio(), "fill volume not keeping up with request spend");
        }
    }

    /// Boundary: lowest resting ask, with the seed rule as fallback.
    fn boundary_level(&self) -> usize {
        derive_boundary(
            self.state.lowest_ask_level(),
            self.cfg.strategy.n_seeded_levels,
            self.cfg.allocation.token,
            self.cfg.strategy.order_sz,
            self.grid.len(),
        )
    }

    /// Re-anchor local state to exchange truth: cancel orphans, drop
    /// ghosts, overwrite balances and budget.
    async fn reconcile(&mut self) -> Result<()> {
        let open = self
            .info
            .open_orders(&self.user)
            .await
            .context("reconcile: open orders")?;
        let exchange_oids: HashSet<u64> = open
            .iter()
            .filter(|o| self.coin_aliases.contains(&o.coin))
            .map(|o| o.oid)
            .collect();
        self.last_exchange_orders = exchange_oids.len();

        let rec = self.state.reconcile(&exchange_oids);
        if !rec.ghosts.is_empty() || !rec.orphaned.is_empty() {
            warn!(
                ghosts = rec.ghosts.len(),
                orphans = rec.orphaned.len(),
                "state drift detected"
            );
        }
        for oid in &rec.ghosts {
            self.state.remove_ghost(*oid);
        }
        if !rec.orphaned.is_empty() {
            let diff = OrderDiff {
                cancels: rec.orphaned,
                ..Default::default()
            };
            self.emitter
                .emit(diff, &mut self.state, &mut self.budget)
                .await;
        }

        let balances = self
            .info
            .spot_user_state(&self.user)
            .await
            .context("reconcile: balances")?;
        self.inventory.on_balance_update(
            balances.total_for(&self.token_name).unwrap_or(0.0),
            balances.total_for("USDC").unwrap_or(0.0),
        );

        let limits = self
            .info
            .user_rate_limit(&self.user)
            .await
            .context("reconcile: rate limit")?;
        self.budget
            .sync_from_exchange(parse_f64(&limits.cum_vlm), limits.n_requests_used);

        info!(
            boundary = self.boundary_level(),
            bids = self.state.count_side(Side::Buy),
            asks = self.state.count_side(Side::Sell),
            token = self.inventory.effective_token(),
            usdc = self.inventory.effective_usdc(),
            exchange_orders = self.last_exchange_orders,
            mid = self.ws.mid_for(&self.cfg.market.coin),
            "reconciled"
        );
        Ok(())
    }

    fn on_ws_event(&mut self, event: WsEvent) {
        match event {
            WsEvent::OrderUpdates(updates) => {
                for update in updates {
                    if !self.coin_aliases.contains(&update.order.coin) {
                        continue;
                    }
                    self.on_order_update(&update.status, &update.order);
                }
            }
            WsEvent::Fills(fills) => {
                if fills.is_snapshot {
                    debug!(n = fills.fills.len(), "fill snapshot replay");
                }
                for fill in fills.fills {
                    if self.coin_aliases.contains(&fill.coin) {
                        self.on_fill(&fill);
                    }
                }
            }
            WsEvent::Balances(balances) => self.on_balances(&balances),
            WsEvent::Mids(mids) => {
                if let Some(px) = mids.get(&self.cfg.market.coin) {
                    debug!(mid = %px, "mid update");
                }
            }
            WsEvent::Reconnected => {
                warn!("stream reconnected; forcing reconciliation");
                self.force_reconcile = true;
            }
        }
    }

    fn on_order_update(&mut self, status: &str, order: &crate::exchange::types::OrderUpdateBody) {
        let Some(side) = Side::from_wire(&order.side) else {
            return;
        };
        match status {
            "open" => {
                let px = parse_f64(&order.limit_px);
                if let Some(level) = self.grid.level_for_price(px) {
                    self.state
                        .on_place_confirmed(order.oid, side, level, px, parse_f64(&order.sz));
                }
            }
            // Fills are owned by the userFills path so inventory and budget
            // never miss one to event ordering.
            "filled" => {}
            "canceled" | "marginCanceled" | "reduceOnlyCanceled" | "rejected" => {
                self.state.remove_ghost(order.oid);
            }
            other => debug!(status = other, oid = order.oid, "unhandled order status"),
        }
    }

    fn on_fill(&mut self, fill: &UserFill) {
        let px = parse_f64(&fill.px);
        let sz = parse_f64(&fill.sz);
        let Some(result) = self.state.on_fill(fill.tid, fill.oid, sz) else {
            debug!(tid = fill.tid, oid = fill.oid, "duplicate or unknown fill");
            return;
        };
        match result.side {
            Side::Sell => self.inventory.on_ask_fill(px, sz),
            Side::Buy => self.inventory.on_bid_fill(px, sz),
        }
        // Volume restores request budget; only count deduped fills.
        self.budget.on_fill(px * sz);
        info!(
            side = %result.side,
            px,
            sz,
            full = result.fully_filled,
            token = self.inventory.effective_token(),
            usdc = self.inventory.effective_usdc(),
            "fill"
        );
    }

    fn on_balances(&mut self, balances: &[SpotBalance]) {
        let token = balances
            .iter()
            .find(|b| b.coin == self.token_name)
            .map(|b| parse_f64(&b.total));
        let usdc = balances
            .iter()
            .find(|b| b.coin == "USDC")
            .map(|b| parse_f64(&b.total));
        if let (Some(token), Some(usdc)) = (token, usdc) {
            self.inventory.on_balance_update(token, usdc);
        }
    }
}

/// Lowest resting ask wins; otherwise the operator seed, or the number of
/// full tranches the allocation decomposes into.
pub fn derive_boundary(
    lowest_ask: Option<usize>,
    n_seeded_levels: usize,
    allocated_token: f64,
    order_sz: f64,
    n_orders: usize,
) -> usize {
    let boundary = match lowest_ask {
        Some(level) => level,
        None if n_seeded_levels > 0 => n_seeded_levels,
        None => {
            if order_sz > 0.0 {
                (allocated_token / order_sz).round() as usize
            } else {
                n_orders
            }
        }
    };
    boundary.min(n_orders)
}
