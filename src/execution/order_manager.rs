//! Order lifecycle per outcome token.
//!
//! - Keeps a small set of live post-only orders for one token
//! - Cancels stale orders after `cancel_reprice_sec`
//! - Reprices when the quote moves by at least one tick
//! - Guards post-only quotes against crossing the touch
//! - Paper mode: stochastic fill simulation with markout accounting
//!
//! Every lifecycle transition is journaled to the orders table; simulated
//! fills are journaled to the trades table. The RNG is seeded from the run id
//! so paper runs reproduce exactly given identical inputs.

use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution, Normal};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::config::{SimConfig, SpreadMode};
use crate::db::repo::{self, OrderRow, TradeRow};
use crate::execution::venue::{PlaceResult, VenueAdapter};
use crate::types::{OrderStatus, Side};
use crate::util::now_ts;

/// One resting order we believe is live on the venue.
#[derive(Debug, Clone)]
pub struct LiveOrderState {
    pub local_order_id: String,
    pub venue_order_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    /// Remaining size; decremented on simulated partial fills.
    pub size: f64,
    pub created_ts: i64,
}

/// Aggregate of one simulation pass, fed back into calibration state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimFillStats {
    pub fills: u64,
    pub markout_sum: f64,
    pub realized_spread_sum: f64,
}

pub struct OrderManager {
    run_id: String,
    token_id: String,
    venue: Arc<dyn VenueAdapter>,
    pub max_orders_per_token: usize,
    pub cancel_reprice_sec: f64,
    post_only: bool,
    tick_size: Option<f64>,
    live: Vec<LiveOrderState>,
    rng: StdRng,
}

impl OrderManager {
    pub fn new(
        run_id: &str,
        token_id: &str,
        venue: Arc<dyn VenueAdapter>,
        max_orders_per_token: usize,
        cancel_reprice_sec: f64,
        post_only: bool,
        tick_size: Option<f64>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            token_id: token_id.to_string(),
            venue,
            max_orders_per_token,
            cancel_reprice_sec,
            post_only,
            tick_size: tick_size.filter(|t| *t > 0.0),
            live: Vec::new(),
            rng: StdRng::seed_from_u64(seed_from_run_id(run_id)),
        }
    }

    pub fn live(&self) -> &[LiveOrderState] {
        &self.live
    }

    /// Zero/None keeps the previous tick size.
    pub fn set_tick_size(&mut self, tick: Option<f64>) {
        if let Some(t) = tick.filter(|t| *t > 0.0) {
            self.tick_size = Some(t);
        }
    }

    fn tick(&self) -> f64 {
        self.tick_size.unwrap_or(1e-3)
    }

    /// A move of at least one tick counts as a price change; without a known
    /// tick, fall back to max(1e-4, 1 bp of the old price).
    fn price_changed(&self, old: f64, new: f64) -> bool {
        match self.tick_size {
            Some(t) => (old - new).abs() >= t - 1e-12,
            None => (old - new).abs() >= (old * 0.0001).max(1e-4),
        }
    }

    /// Post-only guard: push a crossing quote one tick inside the touch, or
    /// refuse when the adjustment leaves (0, 1).
    fn guard_post_only(
        &self,
        side: Side,
        price: f64,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
    ) -> Option<f64> {
        if !self.post_only {
            return Some(price);
        }
        match side {
            Side::Buy => {
                if let Some(ask) = best_ask {
                    if price >= ask {
                        let adj = ask - self.tick();
                        return (adj > 0.0).then_some(adj);
                    }
                }
            }
            Side::Sell => {
                if let Some(bid) = best_bid {
                    if price <= bid {
                        let adj = bid + self.tick();
                        return (adj < 1.0).then_some(adj);
                    }
                }
            }
        }
        Some(price)
    }

    fn row(
        &self,
        o: &LiveOrderState,
        condition_id: Option<&str>,
        status: OrderStatus,
        updated_ts: i64,
        meta: serde_json::Value,
    ) -> OrderRow {
        OrderRow {
            run_id: self.run_id.clone(),
            local_order_id: o.local_order_id.clone(),
            venue_order_id: Some(o.venue_order_id.clone()),
            condition_id: condition_id.map(str::to_string),
            token_id: o.token_id.clone(),
            side: o.side,
            price: o.price,
            size: o.size,
            post_only: self.post_only,
            status,
            created_ts: o.created_ts,
            updated_ts,
            meta,
        }
    }

    /// Cancel every live order older than `cancel_reprice_sec`. Returns the
    /// number of cancels the venue acknowledged.
    pub async fn cancel_stale(&mut self, conn: &Connection) -> Result<usize> {
        let now = now_ts();
        let venue = self.venue.clone();
        let mut cancels = 0usize;
        let mut keep = Vec::with_capacity(self.live.len());
        for o in std::mem::take(&mut self.live) {
            if (now - o.created_ts) as f64 >= self.cancel_reprice_sec {
                let ok = venue.cancel(&o.venue_order_id).await;
                if ok {
                    cancels += 1;
                }
                let status = if ok { OrderStatus::Canceled } else { OrderStatus::Error };
                repo::upsert_order(
                    conn,
                    &self.row(&o, None, status, now, json!({ "reason": "stale", "ok": ok })),
                )?;
            } else {
                keep.push(o);
            }
        }
        self.live = keep;
        Ok(cancels)
    }

    /// Place a quote, replacing any same-side order whose price moved by at
    /// least a tick. A quote identical to a live order (same side, within a
    /// tick, same size) is a SKIP: success with no venue traffic.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_or_replace(
        &mut self,
        conn: &Connection,
        condition_id: &str,
        side: Side,
        price: f64,
        size: f64,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
    ) -> Result<PlaceResult> {
        let now = now_ts();
        let venue = self.venue.clone();

        let Some(price) = self.guard_post_only(side, price, best_bid, best_ask) else {
            return Ok(PlaceResult {
                success: false,
                venue_order_id: None,
                error: Some("post_only_guard_blocked".into()),
                raw: Some(json!({ "best_bid": best_bid, "best_ask": best_ask })),
            });
        };

        // Identical to a live order → SKIP, leave the book alone.
        if let Some(o) = self
            .live
            .iter()
            .find(|o| o.side == side && !self.price_changed(o.price, price) && (o.size - size).abs() <= 1e-9)
        {
            return Ok(PlaceResult::skip(&o.venue_order_id));
        }

        // Replace: cancel same-side orders whose price moved.
        let mut keep = Vec::with_capacity(self.live.len());
        for o in std::mem::take(&mut self.live) {
            if o.side == side && self.price_changed(o.price, price) {
                let ok = venue.cancel(&o.venue_order_id).await;
                let status = if ok { OrderStatus::Canceled } else { OrderStatus::Error };
                repo::upsert_order(
                    conn,
                    &self.row(
                        &o,
                        Some(condition_id),
                        status,
                        now,
                        json!({ "reason": "reprice", "ok": ok, "new_price": price }),
                    ),
                )?;
            } else {
                keep.push(o);
            }
        }
        self.live = keep;

        // Capacity: cancel oldest first (FIFO by created_ts).
        while self.live.len() >= self.max_orders_per_token {
            let o = self.live.remove(0);
            let ok = venue.cancel(&o.venue_order_id).await;
            let status = if ok { OrderStatus::Canceled } else { OrderStatus::Error };
            repo::upsert_order(
                conn,
                &self.row(&o, Some(condition_id), status, now, json!({ "reason": "cap", "ok": ok })),
            )?;
        }

        let local_order_id = format!(
            "{}-{}-{}-{}-{}",
            &self.run_id[..8.min(self.run_id.len())],
            &condition_id[..6.min(condition_id.len())],
            &self.token_id[..6.min(self.token_id.len())],
            now,
            side.as_str(),
        );
        let res = venue
            .place_limit(
                &self.token_id,
                side,
                price,
                size,
                self.post_only,
                &json!({ "condition_id": condition_id }),
            )
            .await;

        let status = if res.success { OrderStatus::Placed } else { OrderStatus::Rejected };
        repo::upsert_order(
            conn,
            &OrderRow {
                run_id: self.run_id.clone(),
                local_order_id: local_order_id.clone(),
                venue_order_id: res.venue_order_id.clone(),
                condition_id: Some(condition_id.to_string()),
                token_id: self.token_id.clone(),
                side,
                price,
                size,
                post_only: self.post_only,
                status,
                created_ts: now,
                updated_ts: now,
                meta: json!({
                    "raw": res.raw,
                    "err": res.error,
                    "best_bid": best_bid,
                    "best_ask": best_ask,
                }),
            },
        )?;

        if res.success {
            if let Some(venue_order_id) = &res.venue_order_id {
                self.live.push(LiveOrderState {
                    local_order_id,
                    venue_order_id: venue_order_id.clone(),
                    token_id: self.token_id.clone(),
                    side,
                    price,
                    size,
                    created_ts: now,
                });
            }
        }
        Ok(res)
    }

    // ─────────────────────────────────────────────────
    // Paper fill simulation
    // ─────────────────────────────────────────────────

    /// Stochastic fills against the public book for every live order.
    ///
    /// Per order: P(fill) = min(0.95, p₀ · competitiveness · edge · spread)
    /// with p₀ = 1 − exp(−λ·dt). Filled size is full with `full_fill_prob`,
    /// otherwise a Beta-distributed fraction of the remainder. A Gaussian
    /// future mid produces the markout; both feed calibration state.
    #[allow(clippy::too_many_arguments)]
    pub fn simulate_fills(
        &mut self,
        conn: &Connection,
        sim: &SimConfig,
        condition_id: &str,
        midpoint: Option<f64>,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
        dt_sec: f64,
        ts: Option<i64>,
        intensity_override: Option<f64>,
        depth_top: Option<f64>,
    ) -> Result<SimFillStats> {
        if !self.venue.is_paper() || !sim.enabled || self.live.is_empty() {
            return Ok(SimFillStats::default());
        }

        let now = ts.unwrap_or_else(now_ts);
        let tick = self.tick();
        let dt = dt_sec.max(0.1);
        let intensity = intensity_override.unwrap_or(sim.fill_intensity);
        let base_p = 1.0 - (-intensity.max(0.0) * dt).exp(); // Poisson: P(at least one)

        let markout_dist = Normal::new(0.0, sim.markout_sigma_bps / 10_000.0)
            .unwrap_or_else(|_| Normal::new(0.0, 0.002).unwrap());

        let mut out = SimFillStats::default();
        let mut keep: Vec<LiveOrderState> = Vec::with_capacity(self.live.len());

        for mut o in std::mem::take(&mut self.live) {
            let px = o.price;
            let remaining = o.size;
            if remaining <= 1e-9 {
                continue;
            }

            // Competitiveness: distance to the same-side best, in ticks.
            let d_ticks = match o.side {
                Side::Buy => best_bid.map(|b| (px - b).abs() / tick.max(1e-9)),
                Side::Sell => best_ask.map(|a| (px - a).abs() / tick.max(1e-9)),
            }
            .unwrap_or(9e9);
            let competitive = if d_ticks <= 0.5 {
                1.0
            } else if d_ticks <= 1.5 {
                0.60
            } else if d_ticks <= 2.5 {
                0.35
            } else if d_ticks <= 4.5 {
                0.22
            } else {
                0.15
            };

            // Quoting far from mid fills less.
            let edge_factor = match midpoint {
                Some(mid) if mid > 1e-9 => {
                    let edge_bps = (px - mid).abs() / mid * 10_000.0;
                    1.0 / (1.0 + edge_bps / 80.0)
                }
                _ => 1.0,
            };

            // Wide-spread penalty, unless it already went into λ.
            let spread_ticks = match (best_bid, best_ask) {
                (Some(b), Some(a)) => Some(((a - b) / tick.max(1e-9)).max(0.0)),
                _ => None,
            };
            let spread_factor = match (spread_ticks, sim.spread_mode) {
                (Some(st), SpreadMode::Factor) => 1.0 / (1.0 + sim.spread_k * (st - 1.0).max(0.0)),
                _ => 1.0,
            };

            let p_fill = (base_p * competitive * edge_factor * spread_factor).clamp(0.0, 0.95);
            if self.rng.gen::<f64>() >= p_fill {
                keep.push(o);
                continue;
            }

            // Markout model: future_mid = mid · (1 + N(0, σ)).
            let eps = markout_dist.sample(&mut self.rng);
            let future_mid = midpoint.map(|m| (m * (1.0 + eps)).clamp(0.001, 0.999));

            let realized_spread = match (midpoint, o.side) {
                (Some(mid), Side::Buy) => mid - px,
                (Some(mid), Side::Sell) => px - mid,
                _ => 0.0,
            };

            let frac = if !sim.partial_fill || self.rng.gen::<f64>() < sim.full_fill_prob {
                1.0
            } else {
                let beta = Beta::new(sim.partial_beta_a.max(0.1), sim.partial_beta_b.max(0.1))
                    .unwrap_or_else(|_| Beta::new(2.0, 6.0).unwrap());
                let raw = beta.sample(&mut self.rng);
                sim.partial_min_frac + (sim.partial_max_frac - sim.partial_min_frac) * raw
            };
            let fill_size = (remaining * frac).max(1e-6).min(remaining);
            let new_remaining = remaining - fill_size;
            let status = if new_remaining <= 1e-9 {
                OrderStatus::Filled
            } else {
                OrderStatus::Partial
            };

            let markout = match (future_mid, o.side) {
                (Some(fm), Side::Buy) => (fm - px) * fill_size,
                (Some(fm), Side::Sell) => (px - fm) * fill_size,
                _ => 0.0,
            };

            let trade_id = format!("paper-{}", Uuid::new_v4());
            repo::insert_trade(
                conn,
                &TradeRow {
                    run_id: self.run_id.clone(),
                    trade_id,
                    venue_order_id: Some(o.venue_order_id.clone()),
                    condition_id: Some(condition_id.to_string()),
                    token_id: Some(self.token_id.clone()),
                    side: Some(o.side),
                    price: Some(px),
                    size: Some(fill_size),
                    status: Some(status.as_str().to_string()),
                    ts: now,
                    raw: json!({
                        "sim": true,
                        "p_fill": p_fill,
                        "competitive": competitive,
                        "edge_factor": edge_factor,
                        "spread_factor": spread_factor,
                        "spread_ticks": spread_ticks,
                        "best_bid": best_bid,
                        "best_ask": best_ask,
                        "mid": midpoint,
                        "future_mid": future_mid,
                        "markout": markout,
                        "realized_spread": realized_spread * fill_size,
                        "markout_sigma_bps": sim.markout_sigma_bps,
                        "intensity_used": intensity,
                        "depth_top": depth_top,
                    }),
                },
            )?;

            // Journal the residual so the next pass keeps simulating partials.
            let mut journal = o.clone();
            journal.size = new_remaining.max(0.0);
            repo::upsert_order(
                conn,
                &self.row(
                    &journal,
                    Some(condition_id),
                    status,
                    now,
                    json!({ "reason": "paper_sim_fill", "fill_size": fill_size, "remaining": new_remaining }),
                ),
            )?;

            out.fills += 1;
            out.markout_sum += markout;
            out.realized_spread_sum += realized_spread * fill_size;
            if status == OrderStatus::Partial {
                o.size = new_remaining;
                keep.push(o);
            }
        }

        self.live = keep;
        Ok(out)
    }
}

/// Stable 32-bit seed from the run id: the low bits of the UUID when it parses,
/// a positional byte sum otherwise.
pub fn seed_from_run_id(run_id: &str) -> u64 {
    if let Ok(u) = Uuid::parse_str(run_id) {
        return (u.as_u128() & 0xFFFF_FFFF) as u64;
    }
    let s = if run_id.is_empty() { "pmm" } else { run_id };
    let mut acc: u64 = 0;
    for (i, b) in s.bytes().enumerate() {
        acc = acc.wrapping_add((i as u64 + 1) * b as u64);
    }
    acc & 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::connect_memory;
    use crate::execution::venue::PaperVenue;

    const RUN: &str = "11111111-2222-3333-4444-555555555555";

    fn manager(max_orders: usize, cancel_sec: f64, tick: Option<f64>) -> OrderManager {
        OrderManager::new(RUN, "tok-1", Arc::new(PaperVenue::new()), max_orders, cancel_sec, true, tick)
    }

    fn count_status(conn: &Connection, status: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE status=?",
            [status],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_seed_is_stable() {
        assert_eq!(seed_from_run_id(RUN), seed_from_run_id(RUN));
        assert_eq!(seed_from_run_id("not-a-uuid"), seed_from_run_id("not-a-uuid"));
        assert_ne!(seed_from_run_id(RUN), seed_from_run_id("not-a-uuid"));
        assert!(seed_from_run_id("") <= 0xFFFF_FFFF);
    }

    #[tokio::test]
    async fn test_post_only_guard_adjusts_buy() {
        let conn = connect_memory();
        let mut om = manager(4, 60.0, Some(0.01));
        let res = om
            .place_or_replace(&conn, "cond", Side::Buy, 0.51, 10.0, Some(0.48), Some(0.50))
            .await
            .unwrap();
        assert!(res.success);
        assert_eq!(om.live().len(), 1);
        assert!((om.live()[0].price - 0.49).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_post_only_guard_blocks_at_floor() {
        let conn = connect_memory();
        let mut om = manager(4, 60.0, Some(0.01));
        let res = om
            .place_or_replace(&conn, "cond", Side::Buy, 0.02, 10.0, Some(0.004), Some(0.005))
            .await
            .unwrap();
        assert!(!res.success);
        assert_eq!(res.error.as_deref(), Some("post_only_guard_blocked"));
        assert!(om.live().is_empty());
        assert_eq!(count_status(&conn, "PLACED"), 0);
    }

    #[tokio::test]
    async fn test_post_only_guard_blocks_sell_at_ceiling() {
        let conn = connect_memory();
        let mut om = manager(4, 60.0, Some(0.01));
        let res = om
            .place_or_replace(&conn, "cond", Side::Sell, 0.99, 10.0, Some(0.995), Some(0.999))
            .await
            .unwrap();
        assert!(!res.success);
        assert!(om.live().is_empty());
    }

    #[tokio::test]
    async fn test_empty_book_places_unguarded() {
        let conn = connect_memory();
        let mut om = manager(4, 60.0, Some(0.01));
        let res = om
            .place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        assert!(res.success);
        assert_eq!(om.live().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_on_price_move() {
        let conn = connect_memory();
        let mut om = manager(4, 60.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        let first_id = om.live()[0].venue_order_id.clone();
        om.place_or_replace(&conn, "cond", Side::Buy, 0.52, 10.0, None, None)
            .await
            .unwrap();
        assert_eq!(om.live().len(), 1);
        assert!((om.live()[0].price - 0.52).abs() < 1e-9);
        assert_ne!(om.live()[0].venue_order_id, first_id);
        assert_eq!(count_status(&conn, "CANCELED"), 1);
        let meta: String = conn
            .query_row(
                "SELECT meta_json FROM orders WHERE status='CANCELED'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(meta.contains("reprice"));
    }

    #[tokio::test]
    async fn test_sub_tick_move_does_not_replace() {
        let conn = connect_memory();
        let mut om = manager(4, 60.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        // moved 0.004 < tick, different size → a second order, no cancel
        om.place_or_replace(&conn, "cond", Side::Buy, 0.504, 20.0, None, None)
            .await
            .unwrap();
        assert_eq!(om.live().len(), 2);
        assert_eq!(count_status(&conn, "CANCELED"), 0);
    }

    #[tokio::test]
    async fn test_skip_leaves_live_untouched() {
        let conn = connect_memory();
        let mut om = manager(4, 60.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        let venue_id = om.live()[0].venue_order_id.clone();
        let res = om
            .place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        assert!(res.success);
        assert!(res.is_skip());
        assert_eq!(om.live().len(), 1);
        assert_eq!(om.live()[0].venue_order_id, venue_id);
        // no second PLACED row
        assert_eq!(count_status(&conn, "PLACED"), 1);
    }

    #[tokio::test]
    async fn test_capacity_cancels_oldest_fifo() {
        let conn = connect_memory();
        let mut om = manager(2, 60.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 20.0, None, None)
            .await
            .unwrap();
        assert_eq!(om.live().len(), 2);
        // same price, third size → cap evicts the size-10 order
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 30.0, None, None)
            .await
            .unwrap();
        assert_eq!(om.live().len(), 2);
        let sizes: Vec<f64> = om.live().iter().map(|o| o.size).collect();
        assert_eq!(sizes, vec![20.0, 30.0]);
        let meta: String = conn
            .query_row(
                "SELECT meta_json FROM orders WHERE status='CANCELED'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(meta.contains("cap"));
    }

    #[tokio::test]
    async fn test_cancel_stale_empties_aged_orders() {
        let conn = connect_memory();
        let mut om = manager(4, 0.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        let cancels = om.cancel_stale(&conn).await.unwrap();
        assert_eq!(cancels, 1);
        assert!(om.live().is_empty());
        assert_eq!(count_status(&conn, "CANCELED"), 1);
    }

    #[tokio::test]
    async fn test_fresh_orders_survive_cancel_stale() {
        let conn = connect_memory();
        let mut om = manager(4, 3600.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.50, 10.0, None, None)
            .await
            .unwrap();
        assert_eq!(om.cancel_stale(&conn).await.unwrap(), 0);
        assert_eq!(om.live().len(), 1);
    }

    // ── simulator ──

    fn hot_sim() -> SimConfig {
        SimConfig {
            fill_intensity: 5.0, // base_p ≈ 1 → p_fill rides the 0.95 cap
            intensity_adapt: false,
            ..SimConfig::default()
        }
    }

    #[tokio::test]
    async fn test_simulator_deterministic_across_managers() {
        let sim = hot_sim();
        let mut runs: Vec<Vec<(f64, String)>> = Vec::new();
        for _ in 0..2 {
            let conn = connect_memory();
            let mut om = manager(4, 600.0, Some(0.01));
            om.place_or_replace(&conn, "cond", Side::Buy, 0.49, 10.0, Some(0.49), Some(0.51))
                .await
                .unwrap();
            om.place_or_replace(&conn, "cond", Side::Sell, 0.51, 10.0, Some(0.49), Some(0.51))
                .await
                .unwrap();
            for _ in 0..5 {
                om.simulate_fills(
                    &conn,
                    &sim,
                    "cond",
                    Some(0.50),
                    Some(0.49),
                    Some(0.51),
                    3.0,
                    Some(1000),
                    None,
                    Some(500.0),
                )
                .unwrap();
            }
            let mut stmt = conn
                .prepare("SELECT size, status FROM trades ORDER BY rowid")
                .unwrap();
            let rows: Vec<(f64, String)> = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
                .unwrap()
                .collect::<rusqlite::Result<_>>()
                .unwrap();
            assert!(!rows.is_empty());
            runs.push(rows);
        }
        assert_eq!(runs[0].len(), runs[1].len());
        for (a, b) in runs[0].iter().zip(runs[1].iter()) {
            assert!((a.0 - b.0).abs() < 1e-12);
            assert_eq!(a.1, b.1);
        }
    }

    #[tokio::test]
    async fn test_simulator_updates_residuals_and_stats() {
        let conn = connect_memory();
        let sim = hot_sim();
        let mut om = manager(4, 600.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.49, 10.0, Some(0.49), Some(0.51))
            .await
            .unwrap();

        let mut total = SimFillStats::default();
        for _ in 0..20 {
            let stats = om
                .simulate_fills(
                    &conn,
                    &sim,
                    "cond",
                    Some(0.50),
                    Some(0.49),
                    Some(0.51),
                    3.0,
                    Some(1000),
                    None,
                    None,
                )
                .unwrap();
            total.fills += stats.fills;
            total.markout_sum += stats.markout_sum;
            total.realized_spread_sum += stats.realized_spread_sum;
            if om.live().is_empty() {
                break;
            }
        }
        assert!(total.fills > 0);
        // resting one tick below a 0.50 mid: positive captured spread
        assert!(total.realized_spread_sum > 0.0);
        // every remaining live order shrank or vanished
        for o in om.live() {
            assert!(o.size < 10.0);
        }
        let trades: i64 = conn
            .query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))
            .unwrap();
        assert_eq!(trades as u64, total.fills);
    }

    #[tokio::test]
    async fn test_simulator_disabled_is_noop() {
        let conn = connect_memory();
        let sim = SimConfig {
            enabled: false,
            ..hot_sim()
        };
        let mut om = manager(4, 600.0, Some(0.01));
        om.place_or_replace(&conn, "cond", Side::Buy, 0.49, 10.0, None, None)
            .await
            .unwrap();
        let stats = om
            .simulate_fills(&conn, &sim, "cond", Some(0.5), None, None, 3.0, None, None, None)
            .unwrap();
        assert_eq!(stats, SimFillStats::default());
        assert_eq!(om.live().len(), 1);
    }
}
