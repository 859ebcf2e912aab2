//! Symmetric two-sided quoting around the midpoint.
//!
//! The per-market budget must be halved by the caller before it reaches this
//! component, so the YES and NO books together respect the market cap.

use crate::types::{Quote, Side};

pub struct SpreadQuoter {
    pub target_spread_bps: f64,
    /// Budget for this token's book (already split across YES/NO).
    pub max_usd: f64,
    pub alpha_scale: f64,
}

impl SpreadQuoter {
    pub fn new(target_spread_bps: f64, max_usd: f64, alpha_scale: f64) -> Self {
        Self {
            target_spread_bps,
            max_usd,
            alpha_scale,
        }
    }

    /// Two passive quotes: bid below, ask above, both clamped inside (0, 1).
    /// Half-width is mid scaled by the target bps. Sizes are expressed in
    /// outcome tokens, usd / price as a proxy.
    pub fn quotes(&self, midpoint: f64) -> Vec<Quote> {
        let mid = midpoint;
        let half = mid * (self.target_spread_bps / 10_000.0);
        let bid = (mid - half).clamp(0.001, 0.999);
        let ask = (mid + half).clamp(0.001, 0.999);
        let usd_each_side = (self.max_usd / 2.0) * self.alpha_scale;
        let bid_size = (usd_each_side / bid.max(0.01)).max(1.0);
        let ask_size = (usd_each_side / ask.max(0.01)).max(1.0);
        vec![
            Quote {
                side: Side::Buy,
                price: bid,
                size: bid_size,
            },
            Quote {
                side: Side::Sell,
                price: ask,
                size: ask_size,
            },
        ]
    }
}
