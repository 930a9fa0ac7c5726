//! Fixed geometric price ladder.
//!
//! The grid is built once at startup and never changes: level prices are the
//! stable identity that quoting, diffing and order tracking all key on.

use thiserror::Error;

/// Default geometric spacing between adjacent levels (0.3%).
pub const DEFAULT_TICK: f64 = 0.003;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("levels {0} and {1} rounded to the same price; grid is degenerate")]
    Degenerate(usize, usize),
    #[error("level {0} out of range for grid of {1} levels")]
    OutOfRange(usize, usize),
}

#[derive(Debug, Clone)]
pub struct PricingGrid {
    levels: Vec<f64>,
    tick: f64,
}

impl PricingGrid {
    /// Build the ladder: `p_0 = start_px`, `p_i = round(p_{i-1} * (1 + tick))`.
    ///
    /// `round_px` is the venue rounding rule (significant figures + max
    /// decimals). Fails if rounding collapses any adjacent pair.
    pub fn new(
        start_px: f64,
        n_orders: usize,
        tick: f64,
        round_px: impl Fn(f64) -> f64,
    ) -> Result<Self, GridError> {
        let mut levels = Vec::with_capacity(n_orders);
        let mut px = start_px;
        for i in 0..n_orders {
            if i > 0 {
                px = round_px(px * (1.0 + tick));
            }
            if let Some(&prev) = levels.last() {
                if px <= prev {
                    return Err(GridError::Degenerate(i - 1, i));
                }
            }
            levels.push(px);
        }
        Ok(Self { levels, tick })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn price_at_level(&self, level: usize) -> Result<f64, GridError> {
        self.levels
            .get(level)
            .copied()
            .ok_or(GridError::OutOfRange(level, self.levels.len()))
    }

    /// Nearest level for a price, or `None` when the price sits farther than
    /// half the local spacing from the closest level. Ties break to the
    /// lower index.
    pub fn level_for_price(&self, px: f64) -> Option<usize> {
        if self.levels.is_empty() || !px.is_finite() {
            return None;
        }

        let idx = self.levels.partition_point(|&l| l < px);
        let nearest = if idx == 0 {
            0
        } else if idx == self.levels.len() {
            self.levels.len() - 1
        } else {
            let below = px - self.levels[idx - 1];
            let above = self.levels[idx] - px;
            // Tie goes to the lower level.
            if below <= above {
                idx - 1
            } else {
                idx
            }
        };

        let dist = (px - self.levels[nearest]).abs();
        if dist <= 0.5 * self.spacing_at(nearest) {
            Some(nearest)
        } else {
            None
        }
    }

    /// Spacing between `level` and its neighbor on the side that exists.
    fn spacing_at(&self, level: usize) -> f64 {
        if self.levels.len() < 2 {
            return self.levels[0] * self.tick;
        }
        if level + 1 < self.levels.len() {
            self.levels[level + 1] - self.levels[level]
        } else {
            self.levels[level] - self.levels[level - 1]
        }
    }
}

/// Round to `sig_figs` significant digits, capped at `max_decimals` decimal
/// places. Mirrors the venue's spot price rule (5 significant figures,
/// `8 - szDecimals` decimals).
pub fn round_to_sig_figs(px: f64, sig_figs: i32, max_decimals: i32) -> f64 {
    if px <= 0.0 || !px.is_finite() {
        return px;
    }
    let magnitude = px.abs().log10().floor() as i32;
    let decimals = (sig_figs - 1 - magnitude).min(max_decimals).max(0);
    let factor = 10f64.powi(decimals);
    (px * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> PricingGrid {
        PricingGrid::new(1.0, n, DEFAULT_TICK, |px| round_to_sig_figs(px, 5, 8)).unwrap()
    }

    #[test]
    fn construction_is_strictly_increasing() {
        let g = grid(100);
        assert_eq!(g.len(), 100);
        assert_eq!(g.levels()[0], 1.0);
        for w in g.levels().windows(2) {
            assert!(w[0] < w[1], "levels must be strictly increasing: {:?}", w);
        }
    }

    #[test]
    fn construction_fails_when_rounding_collapses_levels() {
        // Rounding to 2 significant figures collapses 1.0 * 1.003.
        let err = PricingGrid::new(1.0, 5, DEFAULT_TICK, |px| round_to_sig_figs(px, 2, 8));
        assert_eq!(err.unwrap_err(), GridError::Degenerate(0, 1));
    }

    #[test]
    fn price_at_level_bounds() {
        let g = grid(5);
        assert!(g.price_at_level(4).is_ok());
        assert_eq!(g.price_at_level(5), Err(GridError::OutOfRange(5, 5)));
    }

    #[test]
    fn level_lookup_exact_and_nearby() {
        let g = grid(10);
        for (i, &px) in g.levels().iter().enumerate() {
            assert_eq!(g.level_for_price(px), Some(i));
        }
        // Slightly off a level still resolves to it.
        assert_eq!(g.level_for_price(g.levels()[3] + 1e-5), Some(3));
    }

    #[test]
    fn level_lookup_rejects_far_prices() {
        let g = grid(10);
        let span = g.levels()[1] - g.levels()[0];
        assert_eq!(g.level_for_price(g.levels()[0] - span), None);
        let top = *g.levels().last().unwrap();
        assert_eq!(g.level_for_price(top * 1.05), None);
    }

    #[test]
    fn level_lookup_tie_breaks_low() {
        let g = PricingGrid::new(1.0, 3, 0.01, |px| px).unwrap();
        let mid = (g.levels()[0] + g.levels()[1]) / 2.0;
        assert_eq!(g.level_for_price(mid), Some(0));
    }

    #[test]
    fn sig_fig_rounding() {
        assert_eq!(round_to_sig_figs(1.234567, 5, 8), 1.2346);
        assert_eq!(round_to_sig_figs(12345.6, 5, 8), 12346.0);
        assert_eq!(round_to_sig_figs(0.00123456, 5, 8), 0.0012346);
        // max_decimals caps before sig figs would.
        assert_eq!(round_to_sig_figs(0.00123456, 5, 4), 0.0012);
    }
}
