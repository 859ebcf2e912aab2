//! Clock and small math helpers.

use chrono::Utc;

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Linear-interpolation quantile over non-negative samples.
/// Negative and non-finite samples are dropped; empty input yields 0.
pub fn quantile(vals: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let mut xs: Vec<f64> = vals
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .collect();
    if xs.is_empty() {
        return 0.0;
    }
    xs.sort_by(f64::total_cmp);
    if xs.len() == 1 {
        return xs[0];
    }
    let pos = (xs.len() - 1) as f64 * q;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return xs[lo];
    }
    let w = pos - lo as f64;
    xs[lo] * (1.0 - w) + xs[hi] * w
}
