//! Capital allocation across the universe.
//!
//! Weights each market by liquidity^p times a quality term derived from
//! calibration telemetry, then distributes the gross budget with per-market
//! min/max caps. Concentrates capital where liquidity is strong and recent
//! fills are not showing adverse selection.

use std::collections::{HashMap, HashSet};

/// Per-market inputs to the allocation.
#[derive(Debug, Clone)]
pub struct MarketFeatures {
    pub condition_id: String,
    pub liquidity_num: f64,
    pub fills: u64,
    pub quotes: u64,
    /// Negative sum means adverse selection.
    pub markout_sum: f64,
    pub realized_spread_sum: f64,
}

pub struct CapitalAllocator {
    pub total_budget_usd: f64,
    pub min_per_market: f64,
    pub max_per_market: f64,
    pub liquidity_power: f64,
    pub quality_k: f64,
}

impl CapitalAllocator {
    pub fn new(
        total_budget_usd: f64,
        min_per_market: f64,
        max_per_market: f64,
        liquidity_power: f64,
        quality_k: f64,
    ) -> Self {
        Self {
            total_budget_usd,
            min_per_market,
            max_per_market,
            liquidity_power,
            quality_k,
        }
    }

    fn weight(&self, f: &MarketFeatures) -> f64 {
        let base = f.liquidity_num.max(1e-9).powf(self.liquidity_power);
        let fill_rate = f.fills as f64 / f.quotes.max(1) as f64;
        let avg_markout = f.markout_sum / f.fills.max(1) as f64;
        let adverse = (-avg_markout).max(0.0);
        let quality =
            (-self.quality_k * adverse).exp() * (0.5 + 0.5 * (fill_rate * 20.0).min(1.0));
        base * quality.clamp(0.05, 1.5)
    }

    /// Distribute the budget. Output sums to the budget within rounding and
    /// every value respects [min, max] after clipping.
    pub fn allocate(&self, feats: &[MarketFeatures]) -> HashMap<String, f64> {
        if feats.is_empty() {
            return HashMap::new();
        }

        let mut w: Vec<f64> = feats.iter().map(|f| self.weight(f)).collect();
        let mut sum: f64 = w.iter().sum();
        if sum <= 0.0 {
            w = vec![1.0; feats.len()];
            sum = feats.len() as f64;
        }

        // Pass 1: proportional
        let mut alloc: HashMap<String, f64> = feats
            .iter()
            .enumerate()
            .map(|(i, f)| (f.condition_id.clone(), self.total_budget_usd * w[i] / sum))
            .collect();

        // Pin mins, track the free set
        let mut pinned: HashMap<String, f64> = HashMap::new();
        let mut remaining = self.total_budget_usd;
        let mut free: HashSet<usize> = (0..feats.len()).collect();
        for (i, f) in feats.iter().enumerate() {
            if alloc[&f.condition_id] < self.min_per_market {
                pinned.insert(f.condition_id.clone(), self.min_per_market);
                remaining -= self.min_per_market;
                free.remove(&i);
            }
        }

        if remaining <= 0.0 {
            // Too many mins: hand back the pinned values, clipped by max.
            return pinned
                .into_iter()
                .map(|(cid, v)| (cid, v.min(self.max_per_market)))
                .collect();
        }

        // Pass 2: re-allocate the free set within what is left
        if !free.is_empty() {
            let s2: f64 = free.iter().map(|&i| w[i]).sum();
            for &i in &free {
                let f = &feats[i];
                alloc.insert(
                    f.condition_id.clone(),
                    remaining * w[i] / s2.max(1e-12),
                );
            }
        }

        // Pass 3: clip max, spread overflow equally across the rest
        let mut overflow = 0.0;
        let mut under: Vec<String> = Vec::new();
        for f in feats {
            let v = alloc[&f.condition_id];
            if v > self.max_per_market {
                overflow += v - self.max_per_market;
                alloc.insert(f.condition_id.clone(), self.max_per_market);
            } else {
                under.push(f.condition_id.clone());
            }
        }
        if overflow > 0.0 && !under.is_empty() {
            let add = overflow / under.len() as f64;
            for cid in under {
                let v = alloc[&cid];
                alloc.insert(cid, (v + add).min(self.max_per_market));
            }
        }

        alloc.extend(pinned);
        alloc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feat(cid: &str, liq: f64, fills: u64, quotes: u64, markout: f64) -> MarketFeatures {
        MarketFeatures {
            condition_id: cid.into(),
            liquidity_num: liq,
            fills,
            quotes,
            markout_sum: markout,
            realized_spread_sum: 0.0,
        }
    }

    #[test]
    fn test_two_markets_liquidity_dominates() {
        let a = CapitalAllocator::new(100.0, 5.0, 60.0, 0.5, 2.0);
        let feats = vec![
            feat("m1", 10_000.0, 10, 100, 0.0),
            feat("m2", 100.0, 10, 100, 0.0),
        ];
        let alloc = a.allocate(&feats);
        assert!(alloc["m1"] > alloc["m2"]);
        assert!(alloc["m1"] >= 5.0 && alloc["m2"] >= 5.0);
        assert!(alloc["m1"] <= 60.0 && alloc["m2"] <= 60.0);
        let total: f64 = alloc.values().sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_min_pinning() {
        let a = CapitalAllocator::new(100.0, 10.0, 90.0, 1.0, 2.0);
        // tiny market would get ≈ nothing proportionally
        let feats = vec![feat("big", 1_000_000.0, 0, 0, 0.0), feat("tiny", 1.0, 0, 0, 0.0)];
        let alloc = a.allocate(&feats);
        assert!((alloc["tiny"] - 10.0).abs() < 1e-9);
        assert!(alloc["big"] <= 90.0);
    }

    #[test]
    fn test_max_clipping_and_overflow_redistribution() {
        let a = CapitalAllocator::new(100.0, 0.05, 40.0, 1.0, 2.0);
        let feats = vec![
            feat("m1", 1_000_000.0, 0, 0, 0.0),
            feat("m2", 1_000.0, 0, 0, 0.0),
            feat("m3", 1_000.0, 0, 0, 0.0),
        ];
        let alloc = a.allocate(&feats);
        for v in alloc.values() {
            assert!(*v <= 40.0 + 1e-9);
        }
        assert!((alloc["m1"] - 40.0).abs() < 1e-9);
        // overflow flowed to the smaller markets and the budget is preserved
        assert!(alloc["m2"] > 1.0 && alloc["m3"] > 1.0);
        let total: f64 = alloc.values().sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_adverse_markout_penalizes_weight() {
        let a = CapitalAllocator::new(100.0, 1.0, 99.0, 0.5, 2.0);
        let feats = vec![
            feat("clean", 10_000.0, 20, 100, 0.0),
            feat("toxic", 10_000.0, 20, 100, -10.0),
        ];
        let alloc = a.allocate(&feats);
        assert!(alloc["clean"] > alloc["toxic"]);
    }

    #[test]
    fn test_empty_features() {
        let a = CapitalAllocator::new(100.0, 5.0, 60.0, 0.5, 2.0);
        assert!(a.allocate(&[]).is_empty());
    }

    #[test]
    fn test_budget_exhausted_by_mins() {
        let a = CapitalAllocator::new(10.0, 20.0, 60.0, 0.5, 2.0);
        let feats = vec![feat("m1", 1.0, 0, 0, 0.0), feat("m2", 1.0, 0, 0, 0.0)];
        let alloc = a.allocate(&feats);
        // both pinned at min, clipped by max
        for v in alloc.values() {
            assert!((*v - 20.0).abs() < 1e-9);
        }
    }
}
