//! Read-side queries backing the `report` CLI command.

use anyhow::Result;
use rusqlite::{params, Connection};

#[derive(Debug)]
pub struct AccountRow {
    pub ts: i64,
    pub cash: f64,
    pub equity: f64,
    pub gross_exposure: f64,
}

#[derive(Debug)]
pub struct RiskEventRow {
    pub ts: i64,
    pub level: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct MarketNotionalRow {
    pub condition_id: String,
    pub notional: f64,
}

#[derive(Debug)]
pub struct PositionRow {
    pub token_id: String,
    pub ts: i64,
    pub qty: f64,
    pub avg_cost: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
}

pub fn latest_account(conn: &Connection, run_id: &str) -> Result<Option<AccountRow>> {
    let mut stmt = conn.prepare(
        "SELECT ts, cash, equity, gross_exposure FROM account_state
         WHERE run_id=? ORDER BY ts DESC LIMIT 1",
    )?;
    let mut rows = stmt.query(params![run_id])?;
    match rows.next()? {
        Some(r) => Ok(Some(AccountRow {
            ts: r.get(0)?,
            cash: r.get(1)?,
            equity: r.get(2)?,
            gross_exposure: r.get(3)?,
        })),
        None => Ok(None),
    }
}

pub fn recent_risk_events(conn: &Connection, run_id: &str, n: usize) -> Result<Vec<RiskEventRow>> {
    let mut stmt = conn.prepare(
        "SELECT ts, level, code, message FROM risk_events
         WHERE run_id=? ORDER BY ts DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![run_id, n as i64], |r| {
            Ok(RiskEventRow {
                ts: r.get(0)?,
                level: r.get(1)?,
                code: r.get(2)?,
                message: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn top_markets_by_trade_notional(
    conn: &Connection,
    run_id: &str,
    n: usize,
) -> Result<Vec<MarketNotionalRow>> {
    let mut stmt = conn.prepare(
        "SELECT condition_id, COALESCE(SUM(price*size),0) AS notional
         FROM trades WHERE run_id=? AND condition_id IS NOT NULL
         GROUP BY condition_id ORDER BY notional DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![run_id, n as i64], |r| {
            Ok(MarketNotionalRow {
                condition_id: r.get(0)?,
                notional: r.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn latest_positions(conn: &Connection, run_id: &str, n: usize) -> Result<Vec<PositionRow>> {
    let mut stmt = conn.prepare(
        "SELECT token_id, ts, qty, avg_cost, realized_pnl, unrealized_pnl, equity
         FROM positions WHERE run_id=? ORDER BY ts DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![run_id, n as i64], |r| {
            Ok(PositionRow {
                token_id: r.get(0)?,
                ts: r.get(1)?,
                qty: r.get(2)?,
                avg_cost: r.get(3)?,
                realized_pnl: r.get(4)?,
                unrealized_pnl: r.get(5)?,
                equity: r.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::{self, TradeRow};
    use crate::db::schema::connect_memory;
    use crate::types::Side;
    use serde_json::json;

    #[test]
    fn test_top_markets_aggregates_notional() {
        let conn = connect_memory();
        for (i, (cond, price, size)) in
            [("c1", 0.5, 100.0), ("c1", 0.5, 100.0), ("c2", 0.2, 10.0)].iter().enumerate()
        {
            repo::insert_trade(
                &conn,
                &TradeRow {
                    run_id: "r".into(),
                    trade_id: format!("t{}", i),
                    venue_order_id: None,
                    condition_id: Some(cond.to_string()),
                    token_id: Some("tok".into()),
                    side: Some(Side::Buy),
                    price: Some(*price),
                    size: Some(*size),
                    status: Some("FILLED".into()),
                    ts: 10 + i as i64,
                    raw: json!({}),
                },
            )
            .unwrap();
        }
        let top = top_markets_by_trade_notional(&conn, "r", 10).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].condition_id, "c1");
        assert!((top[0].notional - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_latest_account_picks_newest() {
        let conn = connect_memory();
        repo::upsert_account_state(&conn, "r", 10, 100.0, 100.0, 0.0, &json!({})).unwrap();
        repo::upsert_account_state(&conn, "r", 20, 90.0, 101.0, 5.0, &json!({})).unwrap();
        let acct = latest_account(&conn, "r").unwrap().unwrap();
        assert_eq!(acct.ts, 20);
        assert!((acct.equity - 101.0).abs() < 1e-9);
        assert!(latest_account(&conn, "other").unwrap().is_none());
    }
}
