//! Trading control loop: one polling pass over the universe per tick.
//!
//! Per tick, in order: ingest fills → build features → allocate capital →
//! per market (liquidity-descending): midpoints, calibration, exposure gate,
//! then per token (YES before NO): book fetch, stale cancels, quoting,
//! simulation → persist calibration → depth-ref update → snapshots → sleep.
//!
//! The loop owns the live-order tables and the inventory aggregate. The only
//! shared resource is the store; the user tape writes trade rows the loop
//! picks up by timestamp on the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use rusqlite::Connection;
use serde_json::json;
use tracing::{info, warn};

use crate::analytics::inventory::InventoryEngine;
use crate::analytics::pnl::{snapshot_pnl, snapshot_positions};
use crate::config::{DepthRefMode, Settings, SimConfig, SpreadMode};
use crate::db::repo::{self, MarketRow};
use crate::execution::order_manager::OrderManager;
use crate::execution::venue::VenueAdapter;
use crate::market::clob::{parse_book, ClobPublicClient};
use crate::market::gamma::GammaClient;
use crate::market::universe::{fetch_top_liquidity_markets, parse_clob_token_ids};
use crate::strategy::allocator::{CapitalAllocator, MarketFeatures};
use crate::strategy::calibrator::{CalibParams, Calibrator};
use crate::strategy::circuit_breaker::CircuitBreaker;
use crate::strategy::quoter::SpreadQuoter;
use crate::strategy::risk::RiskManager;
use crate::types::RiskLevel;
use crate::util::{now_ts, quantile};

/// How a run ended. A breaker halt maps to a non-zero exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Interrupted,
    Halted(String),
}

// ─────────────────────────────────────────────────────────
// Depth reference
// ─────────────────────────────────────────────────────────

/// Rolling reference depth for the simulator's intensity adapter.
/// The value used within a tick is frozen at tick start; the end-of-tick
/// estimate is a clamped quantile of observed samples, EMA-smoothed.
#[derive(Debug, Clone)]
pub struct DepthRefTracker {
    mode: DepthRefMode,
    q: f64,
    static_ref: f64,
    min: f64,
    max: f64,
    ema: f64,
    current: f64,
}

impl DepthRefTracker {
    pub fn new(sim: &SimConfig) -> Self {
        Self {
            mode: sim.depth_ref_mode,
            q: sim.depth_ref_quantile,
            static_ref: sim.depth_ref_static,
            min: sim.depth_ref_min,
            max: sim.depth_ref_max,
            ema: sim.depth_ref_ema.clamp(0.0, 0.99),
            current: sim.depth_ref_static,
        }
    }

    pub fn frozen(&self) -> f64 {
        match self.mode {
            DepthRefMode::Static => self.static_ref,
            DepthRefMode::Quantile => self.current,
        }
    }

    pub fn end_of_tick(&mut self, samples: &[f64]) {
        if self.mode == DepthRefMode::Static {
            return;
        }
        let est = quantile(samples, self.q);
        let est = if est > 0.0 { est } else { self.static_ref };
        let est = est.clamp(self.min, self.max);
        self.current = self.current * self.ema + est * (1.0 - self.ema);
    }
}

/// Effective λ for the simulator: base intensity scaled by sqrt depth ratio,
/// with the wide-spread penalty folded in when `spread_mode = intensity`.
pub fn paper_intensity(
    sim: &SimConfig,
    is_paper: bool,
    depth_top: f64,
    tick: f64,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
    frozen_ref: f64,
) -> Option<f64> {
    if !is_paper || !sim.intensity_adapt {
        return None;
    }
    let depth_ref = match sim.depth_ref_mode {
        DepthRefMode::Static => sim.depth_ref_static,
        DepthRefMode::Quantile => frozen_ref,
    };
    let factor = if depth_ref > 0.0 {
        (depth_top.max(0.0) / depth_ref.max(1.0)).sqrt()
    } else {
        1.0
    };
    let mut v = sim.fill_intensity * factor.clamp(0.25, 3.0);

    if sim.spread_mode == SpreadMode::Intensity {
        if let (Some(b), Some(a)) = (best_bid, best_ask) {
            let spread_ticks = ((a - b) / tick.max(1e-9)).max(0.0);
            v *= 1.0 / (1.0 + sim.spread_k * (spread_ticks - 1.0).max(0.0));
        }
    }
    Some(v.clamp(sim.intensity_min, sim.intensity_max))
}

// ─────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────

pub struct Engine {
    settings: Settings,
    run_id: String,
    conn: Connection,
    venue: Arc<dyn VenueAdapter>,
    gamma: GammaClient,
    clob: ClobPublicClient,
    breaker: CircuitBreaker,
    risk: RiskManager,
    calibrator: Calibrator,
    allocator: CapitalAllocator,
    oms: HashMap<String, OrderManager>,
    inv: InventoryEngine,
    last_fill_ts: i64,
    depth_ref: DepthRefTracker,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        run_id: String,
        conn: Connection,
        venue: Arc<dyn VenueAdapter>,
        breaker: CircuitBreaker,
    ) -> Result<Self> {
        let gamma = GammaClient::new(&settings.gamma_host, settings.http_timeout_sec)?;
        let clob = ClobPublicClient::new(&settings.clob_host, settings.http_timeout_sec)?;
        let risk = RiskManager::new(crate::strategy::risk::RiskLimits {
            alpha: settings.alpha,
            max_usd_per_market: settings.max_usd_per_market,
            max_gross_usd: settings.max_gross_usd,
        });
        let calibrator = Calibrator::new(
            settings.alpha,
            settings.target_spread_bps,
            settings.max_usd_per_market,
            settings.quote_refresh_sec,
            settings.cancel_reprice_sec,
        );
        let allocator = CapitalAllocator::new(
            settings.max_gross_usd.min(settings.starting_cash),
            settings.min_usd_per_market,
            settings.max_usd_per_market,
            settings.alloc_liquidity_power,
            settings.alloc_quality_k,
        );
        let inv = InventoryEngine::new(settings.starting_cash);
        let depth_ref = DepthRefTracker::new(&settings.sim);
        Ok(Self {
            settings,
            run_id,
            conn,
            venue,
            gamma,
            clob,
            breaker,
            risk,
            calibrator,
            allocator,
            oms: HashMap::new(),
            inv,
            last_fill_ts: 0,
            depth_ref,
        })
    }

    async fn refresh_universe(&self) -> Result<usize> {
        let rows = fetch_top_liquidity_markets(
            &self.gamma,
            self.settings.universe_limit,
            &self.settings.universe_order_field,
            self.settings.universe_ascending,
            self.settings.only_active,
            self.settings.only_open,
        )
        .await?;
        repo::upsert_markets(&self.conn, &rows)?;
        Ok(rows.len())
    }

    pub async fn run(&mut self) -> Result<RunOutcome> {
        match self.refresh_universe().await {
            Ok(n) => info!("universe refreshed: {} markets", n),
            Err(e) => warn!("universe refresh failed, using stored universe: {:#}", e),
        }
        let markets = repo::list_universe(&self.conn, self.settings.universe_limit)?;
        if markets.is_empty() {
            bail!("universe empty; run `pmm universe refresh` first");
        }

        info!(
            "run started: {} ({}) markets={} allocator={}",
            self.run_id,
            self.settings.mode.as_str(),
            markets.len(),
            self.settings.enable_allocator,
        );

        loop {
            if let Some(reason) = self.tick(&markets).await? {
                repo::insert_risk_event(
                    &self.conn,
                    &self.run_id,
                    now_ts(),
                    RiskLevel::Error,
                    "HALT",
                    &reason,
                    &json!({}),
                )?;
                warn!("circuit breaker HALT: {}", reason);
                return Ok(RunOutcome::Halted(reason));
            }

            let sleep_sec = self.settings.quote_refresh_sec.max(0.5);
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, stopping after tick");
                    return Ok(RunOutcome::Interrupted);
                }
                _ = tokio::time::sleep(Duration::from_secs_f64(sleep_sec)) => {}
            }
        }
    }

    /// One pass over the universe. Returns a halt reason when the breaker trips.
    async fn tick(&mut self, markets: &[MarketRow]) -> Result<Option<String>> {
        let loop_ts = now_ts();
        let frozen_ref = self.depth_ref.frozen();
        let is_paper = self.venue.is_paper();
        let mut mid_by_token: HashMap<String, f64> = HashMap::new();
        let mut depth_samples: Vec<f64> = Vec::new();

        // 1. Ingest fills written since the last seen timestamp.
        for f in repo::load_fills_since(&self.conn, &self.run_id, self.last_fill_ts)? {
            self.inv.apply_fill(&f.token_id, f.side, f.price, f.size, f.fee);
            self.last_fill_ts = self.last_fill_ts.max(f.ts);
        }

        // 2–3. Features from persisted calibration state, then the budget map.
        let mut feats = Vec::with_capacity(markets.len());
        for m in markets {
            let state = repo::get_calibration(&self.conn, &m.condition_id)?
                .and_then(|row| row.state_json)
                .map(|raw| Calibrator::state_from_json(&raw))
                .unwrap_or_default();
            feats.push(MarketFeatures {
                condition_id: m.condition_id.clone(),
                liquidity_num: m.liquidity_num,
                fills: state.fills,
                quotes: state.quotes,
                markout_sum: state.markout_sum,
                realized_spread_sum: state.realized_spread_sum,
            });
        }
        let alloc_map: HashMap<String, f64> = if self.settings.enable_allocator {
            self.allocator.allocate(&feats)
        } else {
            feats
                .iter()
                .map(|f| (f.condition_id.clone(), self.settings.max_usd_per_market))
                .collect()
        };

        // 4. Market loop, stored liquidity-descending order.
        for m in markets {
            let Some((token_yes, token_no)) =
                m.clob_token_ids.as_deref().and_then(parse_clob_token_ids)
            else {
                continue;
            };

            let mid_yes = self.clob.get_midpoint(&token_yes).await.unwrap_or(0.5);
            let mid_no = self
                .clob
                .get_midpoint(&token_no)
                .await
                .unwrap_or(1.0 - mid_yes);
            mid_by_token.insert(token_yes.clone(), mid_yes);
            mid_by_token.insert(token_no.clone(), mid_no);

            // Load or seed calibration; the allocator owns max_usd.
            let mut params = match repo::get_calibration(&self.conn, &m.condition_id)? {
                Some(row) => CalibParams {
                    alpha: row.alpha,
                    target_spread_bps: row.target_spread_bps,
                    max_usd: row.max_usd,
                    quote_refresh_sec: row.quote_refresh_sec,
                    cancel_reprice_sec: row.cancel_reprice_sec,
                    state: row
                        .state_json
                        .map(|raw| Calibrator::state_from_json(&raw))
                        .unwrap_or_default(),
                },
                None => self.calibrator.init_params(),
            };
            if let Some(budget) = alloc_map.get(&m.condition_id) {
                params.max_usd = *budget;
            }
            let mut params = self.calibrator.next_params(&params);

            // Global exposure gate before quoting.
            let gross_exposure: f64 = self
                .inv
                .pos
                .iter()
                .filter_map(|(tid, p)| mid_by_token.get(tid).map(|mid| p.qty.abs() * mid))
                .sum();
            if gross_exposure >= self.settings.max_gross_usd {
                repo::insert_risk_event(
                    &self.conn,
                    &self.run_id,
                    loop_ts,
                    RiskLevel::Warn,
                    "MAX_GROSS_EXPOSURE",
                    "gross exposure cap reached; skipping new quotes",
                    &json!({ "gross_exposure": gross_exposure, "cap": self.settings.max_gross_usd }),
                )?;
                continue;
            }

            // YES first, then NO.
            for (token_id, mid) in [(&token_yes, mid_yes), (&token_no, mid_no)] {
                let book = self.clob.get_orderbook(token_id).await;
                let top = parse_book(book.as_ref(), self.settings.sim.depth_levels);
                if top.depth_top > 0.0 {
                    depth_samples.push(top.depth_top);
                }
                if let Some(book) = &book {
                    let touch_mid = match (top.best_bid, top.best_ask) {
                        (Some(b), Some(a)) => Some((b + a) / 2.0),
                        _ => Some(mid),
                    };
                    let empty = json!([]);
                    repo::insert_orderbook(
                        &self.conn,
                        &self.run_id,
                        token_id,
                        loop_ts,
                        top.best_bid,
                        top.best_ask,
                        touch_mid,
                        book.get("bids").unwrap_or(&empty),
                        book.get("asks").unwrap_or(&empty),
                    )?;
                }

                let tick_size = self.clob.get_tick_size(token_id).await;

                // Per-market budget split across YES/NO books.
                let quoter = SpreadQuoter::new(
                    params.target_spread_bps,
                    params.max_usd / 2.0,
                    self.risk.size_scale(),
                );
                let quotes = quoter.quotes(mid);
                params.state.quotes += 1;

                let om = self.oms.entry(token_id.clone()).or_insert_with(|| {
                    OrderManager::new(
                        &self.run_id,
                        token_id,
                        self.venue.clone(),
                        self.settings.max_orders_per_market,
                        params.cancel_reprice_sec,
                        self.settings.post_only,
                        tick_size,
                    )
                });
                om.cancel_reprice_sec = params.cancel_reprice_sec;
                om.max_orders_per_token = self.settings.max_orders_per_market;
                om.set_tick_size(tick_size);

                let cancels = om.cancel_stale(&self.conn).await?;
                for _ in 0..cancels {
                    self.breaker.record_cancel();
                }

                for q in quotes.iter().take(self.settings.max_orders_per_market) {
                    let notional = q.price * q.size;
                    if notional > ((params.max_usd / 2.0) * 1.10).max(1.0) {
                        continue;
                    }
                    let res = om
                        .place_or_replace(
                            &self.conn,
                            &m.condition_id,
                            q.side,
                            q.price,
                            q.size,
                            top.best_bid,
                            top.best_ask,
                        )
                        .await?;
                    // SKIPs are free: they never count toward placements.
                    if !res.is_skip() {
                        self.breaker.record_place(res.success);
                    }
                    if let Some(reason) = self.breaker.should_halt() {
                        return Ok(Some(reason));
                    }
                }

                let tick = tick_size.filter(|t| *t > 0.0).unwrap_or(1e-3);
                let intensity_eff = paper_intensity(
                    &self.settings.sim,
                    is_paper,
                    top.depth_top,
                    tick,
                    top.best_bid,
                    top.best_ask,
                    frozen_ref,
                );
                let stats = om.simulate_fills(
                    &self.conn,
                    &self.settings.sim,
                    &m.condition_id,
                    Some(mid),
                    top.best_bid,
                    top.best_ask,
                    self.settings.quote_refresh_sec,
                    Some(loop_ts),
                    intensity_eff,
                    Some(top.depth_top),
                )?;
                params.state.fills += stats.fills;
                params.state.markout_sum += stats.markout_sum;
                params.state.realized_spread_sum += stats.realized_spread_sum;
            }

            repo::upsert_calibration(
                &self.conn,
                &m.condition_id,
                params.alpha,
                params.target_spread_bps,
                params.max_usd,
                params.quote_refresh_sec,
                params.cancel_reprice_sec,
                &Calibrator::state_to_json(&params.state),
            )?;
        }

        // 5. Reference depth for the next tick.
        self.depth_ref.end_of_tick(&depth_samples);

        // 6. Snapshots.
        snapshot_positions(&self.conn, &self.run_id, &self.inv, &mid_by_token, now_ts())?;
        snapshot_pnl(&self.conn, &self.run_id, &self.inv, &mid_by_token)?;

        Ok(None)
    }

}
