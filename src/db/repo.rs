//! Typed reads and writes against the store.
//!
//! All writes are upserts on deterministic primary keys except `insert_run`,
//! which is INSERT-only: reusing a run id is a misconfiguration and is
//! rejected before the loop starts.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::types::{OrderStatus, RiskLevel, Side};
use crate::util::now_iso;

// ─────────────────────────────────────────────────────────
// Row records
// ─────────────────────────────────────────────────────────

/// One market of the trading universe, as refreshed from metadata.
#[derive(Debug, Clone)]
pub struct MarketRow {
    pub condition_id: String,
    pub market_id: Option<String>,
    pub question: Option<String>,
    pub slug: Option<String>,
    pub liquidity_num: f64,
    pub volume_num: f64,
    pub active: bool,
    pub closed: bool,
    pub accepting_orders: bool,
    pub clob_token_ids: Option<String>,
}

/// Full order row as journaled on every lifecycle transition.
#[derive(Debug, Clone)]
pub struct OrderRow {
    pub run_id: String,
    pub local_order_id: String,
    pub venue_order_id: Option<String>,
    pub condition_id: Option<String>,
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub post_only: bool,
    pub status: OrderStatus,
    pub created_ts: i64,
    pub updated_ts: i64,
    pub meta: Value,
}

#[derive(Debug, Clone)]
pub struct TradeRow {
    pub run_id: String,
    pub trade_id: String,
    pub venue_order_id: Option<String>,
    pub condition_id: Option<String>,
    pub token_id: Option<String>,
    pub side: Option<Side>,
    pub price: Option<f64>,
    pub size: Option<f64>,
    pub status: Option<String>,
    pub ts: i64,
    pub raw: Value,
}

/// Persisted calibration row (state stays a JSON blob at this boundary).
#[derive(Debug, Clone)]
pub struct CalibrationRow {
    pub condition_id: String,
    pub alpha: f64,
    pub target_spread_bps: f64,
    pub max_usd: f64,
    pub quote_refresh_sec: f64,
    pub cancel_reprice_sec: f64,
    pub state_json: Option<String>,
}

/// A trade row interpreted as a fill for the inventory engine.
#[derive(Debug, Clone)]
pub struct Fill {
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    pub ts: i64,
    pub trade_id: String,
}

// ─────────────────────────────────────────────────────────
// Runs & markets
// ─────────────────────────────────────────────────────────

pub fn insert_run(conn: &Connection, run_id: &str, mode: &str, config: &Value) -> Result<()> {
    let n = conn
        .execute(
            "INSERT OR IGNORE INTO runs(run_id, mode, started_at, config_json) VALUES(?,?,?,?)",
            params![run_id, mode, now_iso(), config.to_string()],
        )
        .context("insert run")?;
    if n == 0 {
        bail!("run_id already exists: {}", run_id);
    }
    Ok(())
}

pub fn upsert_markets(conn: &Connection, rows: &[MarketRow]) -> Result<()> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO markets(condition_id, market_id, question, slug, liquidity_num, volume_num,
                            active, closed, accepting_orders, clob_token_ids, updated_at)
        VALUES(?,?,?,?,?,?,?,?,?,?,?)
        ON CONFLICT(condition_id) DO UPDATE SET
          market_id=excluded.market_id,
          question=excluded.question,
          slug=excluded.slug,
          liquidity_num=excluded.liquidity_num,
          volume_num=excluded.volume_num,
          active=excluded.active,
          closed=excluded.closed,
          accepting_orders=excluded.accepting_orders,
          clob_token_ids=excluded.clob_token_ids,
          updated_at=excluded.updated_at
        "#,
    )?;
    let updated_at = now_iso();
    for m in rows {
        stmt.execute(params![
            m.condition_id,
            m.market_id,
            m.question,
            m.slug,
            m.liquidity_num,
            m.volume_num,
            m.active as i64,
            m.closed as i64,
            m.accepting_orders as i64,
            m.clob_token_ids,
            updated_at,
        ])?;
    }
    Ok(())
}

/// Universe in stored liquidity-descending order (the loop's market order).
pub fn list_universe(conn: &Connection, limit: usize) -> Result<Vec<MarketRow>> {
    let mut stmt = conn.prepare(
        "SELECT condition_id, market_id, question, slug, liquidity_num, volume_num,
                active, closed, accepting_orders, clob_token_ids
         FROM markets ORDER BY liquidity_num DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| {
            Ok(MarketRow {
                condition_id: r.get(0)?,
                market_id: r.get(1)?,
                question: r.get(2)?,
                slug: r.get(3)?,
                liquidity_num: r.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                volume_num: r.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                active: r.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
                closed: r.get::<_, Option<i64>>(7)?.unwrap_or(0) != 0,
                accepting_orders: r.get::<_, Option<i64>>(8)?.unwrap_or(0) != 0,
                clob_token_ids: r.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Orders, books, trades, tape
// ─────────────────────────────────────────────────────────

pub fn upsert_order(conn: &Connection, row: &OrderRow) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO orders(run_id, local_order_id, venue_order_id, condition_id, token_id, side,
                           price, size, post_only, status, created_ts, updated_ts, meta_json)
        VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?)
        ON CONFLICT(run_id, local_order_id) DO UPDATE SET
          venue_order_id=excluded.venue_order_id,
          condition_id=COALESCE(excluded.condition_id, orders.condition_id),
          token_id=excluded.token_id,
          side=excluded.side,
          price=excluded.price,
          size=excluded.size,
          post_only=excluded.post_only,
          status=excluded.status,
          updated_ts=excluded.updated_ts,
          meta_json=excluded.meta_json
        "#,
        params![
            row.run_id,
            row.local_order_id,
            row.venue_order_id,
            row.condition_id,
            row.token_id,
            row.side.as_str(),
            row.price,
            row.size,
            row.post_only as i64,
            row.status.as_str(),
            row.created_ts,
            row.updated_ts,
            row.meta.to_string(),
        ],
    )
    .context("upsert order")?;
    Ok(())
}

/// Best-effort status update from the user tape, keyed by venue order id.
pub fn update_order_status_by_venue_id(
    conn: &Connection,
    run_id: &str,
    venue_order_id: &str,
    status: &str,
    ts: i64,
) -> Result<usize> {
    let n = conn.execute(
        "UPDATE orders SET status=?, updated_ts=? WHERE run_id=? AND venue_order_id=?",
        params![status, ts, run_id, venue_order_id],
    )?;
    Ok(n)
}

#[allow(clippy::too_many_arguments)]
pub fn insert_orderbook(
    conn: &Connection,
    run_id: &str,
    token_id: &str,
    ts: i64,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
    midpoint: Option<f64>,
    bids: &Value,
    asks: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO orderbooks(run_id, token_id, ts, best_bid, best_ask, midpoint, bids_json, asks_json)
         VALUES(?,?,?,?,?,?,?,?)",
        params![
            run_id,
            token_id,
            ts,
            best_bid,
            best_ask,
            midpoint,
            bids.to_string(),
            asks.to_string(),
        ],
    )
    .context("insert orderbook")?;
    Ok(())
}

pub fn insert_trade(conn: &Connection, row: &TradeRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO trades(run_id, trade_id, venue_order_id, condition_id, token_id,
                                       side, price, size, status, ts, raw_json)
         VALUES(?,?,?,?,?,?,?,?,?,?,?)",
        params![
            row.run_id,
            row.trade_id,
            row.venue_order_id,
            row.condition_id,
            row.token_id,
            row.side.map(|s| s.as_str()),
            row.price,
            row.size,
            row.status,
            row.ts,
            row.raw.to_string(),
        ],
    )
    .context("insert trade")?;
    Ok(())
}

pub fn insert_user_event(
    conn: &Connection,
    run_id: &str,
    event_id: &str,
    event_type: &str,
    ts: i64,
    raw: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO tape_user_events(run_id, event_id, event_type, ts, raw_json)
         VALUES(?,?,?,?,?)",
        params![run_id, event_id, event_type, ts, raw.to_string()],
    )
    .context("insert user event")?;
    Ok(())
}

/// Fills newer than `since_ts`, oldest first. Rows missing side/price/size are
/// skipped (the tape can carry non-fill statuses).
pub fn load_fills_since(conn: &Connection, run_id: &str, since_ts: i64) -> Result<Vec<Fill>> {
    let mut stmt = conn.prepare(
        "SELECT token_id, side, price, size, ts, trade_id
         FROM trades WHERE run_id=? AND ts>? ORDER BY ts ASC",
    )?;
    let mut out = Vec::new();
    let mut rows = stmt.query(params![run_id, since_ts])?;
    while let Some(r) = rows.next()? {
        let token_id: Option<String> = r.get(0)?;
        let side: Option<String> = r.get(1)?;
        let price: Option<f64> = r.get(2)?;
        let size: Option<f64> = r.get(3)?;
        let (Some(token_id), Some(side), Some(price), Some(size)) = (token_id, side, price, size)
        else {
            continue;
        };
        let Some(side) = Side::parse(&side) else {
            continue;
        };
        out.push(Fill {
            token_id,
            side,
            price,
            size,
            fee: 0.0,
            ts: r.get(4)?,
            trade_id: r.get(5)?,
        });
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────
// Calibration
// ─────────────────────────────────────────────────────────

pub fn get_calibration(conn: &Connection, condition_id: &str) -> Result<Option<CalibrationRow>> {
    let row = conn
        .query_row(
            "SELECT condition_id, alpha, target_spread_bps, max_usd, quote_refresh_sec,
                    cancel_reprice_sec, state_json
             FROM market_calibration WHERE condition_id=?",
            [condition_id],
            |r| {
                Ok(CalibrationRow {
                    condition_id: r.get(0)?,
                    alpha: r.get(1)?,
                    target_spread_bps: r.get(2)?,
                    max_usd: r.get(3)?,
                    quote_refresh_sec: r.get(4)?,
                    cancel_reprice_sec: r.get(5)?,
                    state_json: r.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
pub fn upsert_calibration(
    conn: &Connection,
    condition_id: &str,
    alpha: f64,
    target_spread_bps: f64,
    max_usd: f64,
    quote_refresh_sec: f64,
    cancel_reprice_sec: f64,
    state: &Value,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO market_calibration(condition_id, alpha, target_spread_bps, max_usd,
                                       quote_refresh_sec, cancel_reprice_sec, updated_at, state_json)
        VALUES(?,?,?,?,?,?,?,?)
        ON CONFLICT(condition_id) DO UPDATE SET
          alpha=excluded.alpha,
          target_spread_bps=excluded.target_spread_bps,
          max_usd=excluded.max_usd,
          quote_refresh_sec=excluded.quote_refresh_sec,
          cancel_reprice_sec=excluded.cancel_reprice_sec,
          updated_at=excluded.updated_at,
          state_json=excluded.state_json
        "#,
        params![
            condition_id,
            alpha,
            target_spread_bps,
            max_usd,
            quote_refresh_sec,
            cancel_reprice_sec,
            now_iso(),
            state.to_string(),
        ],
    )
    .context("upsert calibration")?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Risk events & snapshots
// ─────────────────────────────────────────────────────────

pub fn insert_risk_event(
    conn: &Connection,
    run_id: &str,
    ts: i64,
    level: RiskLevel,
    code: &str,
    message: &str,
    meta: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO risk_events(run_id, ts, level, code, message, meta_json)
         VALUES(?,?,?,?,?,?)",
        params![run_id, ts, level.as_str(), code, message, meta.to_string()],
    )
    .context("insert risk event")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_position_snapshot(
    conn: &Connection,
    run_id: &str,
    token_id: &str,
    ts: i64,
    qty: f64,
    avg_cost: f64,
    realized: f64,
    unrealized: f64,
    cash: f64,
    equity: f64,
    meta: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO positions(run_id, token_id, ts, qty, avg_cost, realized_pnl,
                                          unrealized_pnl, cash, equity, meta_json)
         VALUES(?,?,?,?,?,?,?,?,?,?)",
        params![run_id, token_id, ts, qty, avg_cost, realized, unrealized, cash, equity, meta.to_string()],
    )
    .context("insert position snapshot")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_pnl_snapshot(
    conn: &Connection,
    run_id: &str,
    ts: i64,
    gross_usd: f64,
    realized_usd: f64,
    unrealized_usd: f64,
    cash: f64,
    equity: f64,
    raw: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO pnl_snapshots(run_id, ts, gross_usd, realized_usd, unrealized_usd,
                                              cash, equity, raw_json)
         VALUES(?,?,?,?,?,?,?,?)",
        params![run_id, ts, gross_usd, realized_usd, unrealized_usd, cash, equity, raw.to_string()],
    )
    .context("insert pnl snapshot")?;
    Ok(())
}

pub fn upsert_account_state(
    conn: &Connection,
    run_id: &str,
    ts: i64,
    cash: f64,
    equity: f64,
    gross_exposure: f64,
    meta: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO account_state(run_id, ts, cash, equity, gross_exposure, meta_json)
         VALUES(?,?,?,?,?,?)",
        params![run_id, ts, cash, equity, gross_exposure, meta.to_string()],
    )
    .context("upsert account state")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::connect_memory;
    use serde_json::json;

    fn order(run: &str, id: &str, status: OrderStatus) -> OrderRow {
        OrderRow {
            run_id: run.into(),
            local_order_id: id.into(),
            venue_order_id: Some(format!("v-{}", id)),
            condition_id: Some("cond".into()),
            token_id: "tok".into(),
            side: Side::Buy,
            price: 0.5,
            size: 10.0,
            post_only: true,
            status,
            created_ts: 100,
            updated_ts: 100,
            meta: json!({}),
        }
    }

    #[test]
    fn test_insert_run_rejects_duplicates() {
        let conn = connect_memory();
        insert_run(&conn, "r1", "paper", &json!({})).unwrap();
        assert!(insert_run(&conn, "r1", "paper", &json!({})).is_err());
        insert_run(&conn, "r2", "live", &json!({})).unwrap();
    }

    #[test]
    fn test_upsert_order_updates_in_place() {
        let conn = connect_memory();
        upsert_order(&conn, &order("r", "o1", OrderStatus::Placed)).unwrap();
        let mut o = order("r", "o1", OrderStatus::Canceled);
        o.updated_ts = 130;
        upsert_order(&conn, &o).unwrap();
        let (status, n): (String, i64) = conn
            .query_row(
                "SELECT status, (SELECT COUNT(*) FROM orders) FROM orders WHERE local_order_id='o1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "CANCELED");
        assert_eq!(n, 1);
    }

    #[test]
    fn test_load_fills_since_filters_and_orders() {
        let conn = connect_memory();
        for (i, ts) in [(1, 10), (2, 30), (3, 20)] {
            insert_trade(
                &conn,
                &TradeRow {
                    run_id: "r".into(),
                    trade_id: format!("t{}", i),
                    venue_order_id: None,
                    condition_id: None,
                    token_id: Some("tok".into()),
                    side: Some(Side::Buy),
                    price: Some(0.4),
                    size: Some(5.0),
                    status: Some("FILLED".into()),
                    ts,
                    raw: json!({}),
                },
            )
            .unwrap();
        }
        // A row without a price must be skipped
        insert_trade(
            &conn,
            &TradeRow {
                run_id: "r".into(),
                trade_id: "t4".into(),
                venue_order_id: None,
                condition_id: None,
                token_id: Some("tok".into()),
                side: Some(Side::Sell),
                price: None,
                size: Some(1.0),
                status: None,
                ts: 40,
                raw: json!({}),
            },
        )
        .unwrap();

        let fills = load_fills_since(&conn, "r", 10).unwrap();
        let ids: Vec<&str> = fills.iter().map(|f| f.trade_id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t2"]); // ts>10, ascending
    }

    #[test]
    fn test_markets_roundtrip_sorted_by_liquidity() {
        let conn = connect_memory();
        let rows = vec![
            MarketRow {
                condition_id: "a".into(),
                market_id: None,
                question: Some("A?".into()),
                slug: None,
                liquidity_num: 100.0,
                volume_num: 0.0,
                active: true,
                closed: false,
                accepting_orders: true,
                clob_token_ids: Some("[\"y\",\"n\"]".into()),
            },
            MarketRow {
                condition_id: "b".into(),
                market_id: None,
                question: None,
                slug: None,
                liquidity_num: 900.0,
                volume_num: 0.0,
                active: true,
                closed: false,
                accepting_orders: true,
                clob_token_ids: None,
            },
        ];
        upsert_markets(&conn, &rows).unwrap();
        upsert_markets(&conn, &rows).unwrap(); // idempotent
        let uni = list_universe(&conn, 10).unwrap();
        assert_eq!(uni.len(), 2);
        assert_eq!(uni[0].condition_id, "b");
    }

    #[test]
    fn test_calibration_roundtrip() {
        let conn = connect_memory();
        assert!(get_calibration(&conn, "c").unwrap().is_none());
        let state = json!({"fills": 3, "quotes": 40, "markout_sum": -0.5, "realized_spread_sum": 0.1});
        upsert_calibration(&conn, "c", 1.5, 60.0, 50.0, 3.0, 15.0, &state).unwrap();
        upsert_calibration(&conn, "c", 1.5, 66.0, 40.0, 3.3, 16.5, &state).unwrap();
        let row = get_calibration(&conn, "c").unwrap().unwrap();
        assert!((row.target_spread_bps - 66.0).abs() < 1e-9);
        assert!((row.max_usd - 40.0).abs() < 1e-9);
        assert!(row.state_json.unwrap().contains("\"fills\":3"));
    }
}
