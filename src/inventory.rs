//! Balance tracking with allocated / account / effective layers.
//!
//! `allocated` is the operator ceiling, `account` is exchange truth, and
//! `effective = min(allocated, account)` is the only view the quoting
//! pipeline ever sees. Fills move `account` immediately; reconciliation
//! overwrites it with the venue's numbers.

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    allocated_token: f64,
    allocated_usdc: f64,
    account_token: f64,
    account_usdc: f64,
    effective_token: f64,
    effective_usdc: f64,
}

impl Inventory {
    pub fn new(allocated_token: f64, allocated_usdc: f64) -> Self {
        let mut inv = Self {
            allocated_token,
            allocated_usdc,
            ..Default::default()
        };
        inv.recompute_effective();
        inv
    }

    /// Operator-driven ceiling change.
    pub fn update_allocation(&mut self, token: f64, usdc: f64) {
        self.allocated_token = token;
        self.allocated_usdc = usdc;
        self.recompute_effective();
    }

    /// A sell filled: token leaves, quote arrives.
    pub fn on_ask_fill(&mut self, px: f64, sz: f64) {
        self.account_token -= sz;
        self.account_usdc += px * sz;
        self.recompute_effective();
    }

    /// A buy filled: quote leaves, token arrives.
    pub fn on_bid_fill(&mut self, px: f64, sz: f64) {
        self.account_token += sz;
        self.account_usdc -= px * sz;
        self.recompute_effective();
    }

    /// Overwrite account balances with exchange truth.
    pub fn on_balance_update(&mut self, token: f64, usdc: f64) {
        self.account_token = token;
        self.account_usdc = usdc;
        self.recompute_effective();
    }

    pub fn effective_token(&self) -> f64 {
        self.effective_token
    }

    pub fn effective_usdc(&self) -> f64 {
        self.effective_usdc
    }

    pub fn allocated_token(&self) -> f64 {
        self.allocated_token
    }

    pub fn allocated_usdc(&self) -> f64 {
        self.allocated_usdc
    }

    pub fn account_token(&self) -> f64 {
        self.account_token
    }

    pub fn account_usdc(&self) -> f64 {
        self.account_usdc
    }

    fn recompute_effective(&mut self) {
        self.effective_token = self.allocated_token.min(self.account_token);
        self.effective_usdc = self.allocated_usdc.min(self.account_usdc);
    }
}
