//! Per-market adaptive calibration.
//!
//! Widen the spread when markout is negative (adverse selection), tighten
//! slowly when nothing fills. Deliberately light-weight: the adjustment is a
//! pure function of the accumulated state, and the allocator owns `max_usd`.

use serde::{Deserialize, Serialize};

/// Telemetry counters accumulated across runs. All counters are monotone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibState {
    #[serde(default)]
    pub fills: u64,
    #[serde(default)]
    pub quotes: u64,
    #[serde(default)]
    pub markout_sum: f64,
    #[serde(default)]
    pub realized_spread_sum: f64,
}

/// Tunable quoting parameters for one market.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibParams {
    pub alpha: f64,
    pub target_spread_bps: f64,
    pub max_usd: f64,
    pub quote_refresh_sec: f64,
    pub cancel_reprice_sec: f64,
    pub state: CalibState,
}

pub struct Calibrator {
    base_alpha: f64,
    base_spread_bps: f64,
    base_max_usd: f64,
    base_quote_refresh_sec: f64,
    base_cancel_reprice_sec: f64,
}

impl Calibrator {
    pub fn new(
        base_alpha: f64,
        base_spread_bps: f64,
        base_max_usd: f64,
        base_quote_refresh_sec: f64,
        base_cancel_reprice_sec: f64,
    ) -> Self {
        Self {
            base_alpha,
            base_spread_bps,
            base_max_usd,
            base_quote_refresh_sec,
            base_cancel_reprice_sec,
        }
    }

    pub fn init_params(&self) -> CalibParams {
        CalibParams {
            alpha: self.base_alpha,
            target_spread_bps: self.base_spread_bps,
            max_usd: self.base_max_usd,
            quote_refresh_sec: self.base_quote_refresh_sec,
            cancel_reprice_sec: self.base_cancel_reprice_sec,
            state: CalibState::default(),
        }
    }

    /// One adaptation step. No telemetry yet → unchanged.
    pub fn next_params(&self, prev: &CalibParams) -> CalibParams {
        let st = prev.state;
        if st.quotes == 0 {
            return prev.clone();
        }

        let fill_rate = st.fills as f64 / st.quotes.max(1) as f64;
        let avg_markout = st.markout_sum / st.fills.max(1) as f64;

        let mut spread = prev.target_spread_bps;
        if st.fills >= 5 && avg_markout < 0.0 {
            // up to +50% widening against adverse selection
            spread *= 1.0 + (avg_markout.abs() * 5.0).min(0.50);
        } else if fill_rate < 0.01 && st.quotes > 500 {
            spread *= 0.90;
        }
        let spread = spread.clamp(20.0, 500.0);

        // Cadence follows the spread: wide quotes are refreshed less eagerly.
        let ratio = spread / prev.target_spread_bps;
        let quote_refresh = (prev.quote_refresh_sec * ratio).clamp(1.0, 10.0);
        let cancel_reprice = (prev.cancel_reprice_sec * ratio).clamp(5.0, 60.0);

        CalibParams {
            alpha: prev.alpha,
            target_spread_bps: spread,
            max_usd: prev.max_usd,
            quote_refresh_sec: quote_refresh,
            cancel_reprice_sec: cancel_reprice,
            state: st,
        }
    }

    pub fn state_to_json(state: &CalibState) -> serde_json::Value {
        serde_json::to_value(state).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn state_from_json(raw: &str) -> CalibState {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calib() -> Calibrator {
        Calibrator::new(1.5, 60.0, 50.0, 3.0, 15.0)
    }

    fn params(state: CalibState) -> CalibParams {
        CalibParams {
            alpha: 1.5,
            target_spread_bps: 60.0,
            max_usd: 50.0,
            quote_refresh_sec: 3.0,
            cancel_reprice_sec: 15.0,
            state,
        }
    }

    #[test]
    fn test_no_quotes_is_identity() {
        let c = calib();
        let p = params(CalibState::default());
        assert_eq!(c.next_params(&p), p);
    }

    #[test]
    fn test_widens_on_negative_markout() {
        let c = calib();
        let p = params(CalibState {
            fills: 10,
            quotes: 100,
            markout_sum: -0.02,
            realized_spread_sum: 0.0,
        });
        let next = c.next_params(&p);
        // avg_markout = -0.002 → spread = 60 * 1.01 = 60.6
        assert!((next.target_spread_bps - 60.6).abs() < 1e-9);
        assert!((next.quote_refresh_sec - 3.0 * 1.01).abs() < 1e-9);
        assert!((next.cancel_reprice_sec - 15.0 * 1.01).abs() < 1e-9);
        assert!((next.max_usd - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_widening_is_capped_at_half() {
        let c = calib();
        let p = params(CalibState {
            fills: 50,
            quotes: 100,
            markout_sum: -100.0,
            realized_spread_sum: 0.0,
        });
        let next = c.next_params(&p);
        assert!((next.target_spread_bps - 90.0).abs() < 1e-9); // 60 * 1.5
    }

    #[test]
    fn test_tightens_when_starved() {
        let c = calib();
        let p = params(CalibState {
            fills: 1,
            quotes: 600,
            markout_sum: 0.0,
            realized_spread_sum: 0.0,
        });
        let next = c.next_params(&p);
        assert!((next.target_spread_bps - 54.0).abs() < 1e-9); // 60 * 0.9
    }

    #[test]
    fn test_output_bounds_hold() {
        let c = calib();
        let mut p = params(CalibState {
            fills: 100,
            quotes: 1000,
            markout_sum: -1000.0,
            realized_spread_sum: 0.0,
        });
        p.target_spread_bps = 450.0;
        let next = c.next_params(&p);
        assert!(next.target_spread_bps >= 20.0 && next.target_spread_bps <= 500.0);
        assert!(next.quote_refresh_sec >= 1.0 && next.quote_refresh_sec <= 10.0);
        assert!(next.cancel_reprice_sec >= 5.0 && next.cancel_reprice_sec <= 60.0);
    }

    #[test]
    fn test_state_json_roundtrip_identity() {
        let st = CalibState {
            fills: 7,
            quotes: 123,
            markout_sum: -0.5,
            realized_spread_sum: 0.25,
        };
        let v = Calibrator::state_to_json(&st);
        let back = Calibrator::state_from_json(&v.to_string());
        assert_eq!(st, back);
    }

    #[test]
    fn test_state_json_tolerates_missing_fields() {
        let back = Calibrator::state_from_json("{\"fills\": 3}");
        assert_eq!(back.fills, 3);
        assert_eq!(back.quotes, 0);
    }
}
