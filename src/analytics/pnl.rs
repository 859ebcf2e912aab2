//! End-of-tick snapshot writes: positions, PnL, account state.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Connection;
use serde_json::json;

use crate::analytics::inventory::InventoryEngine;
use crate::db::repo;
use crate::util::now_ts;

/// Persist one position row per held token, marked to the given midpoints.
pub fn snapshot_positions(
    conn: &Connection,
    run_id: &str,
    inv: &InventoryEngine,
    mids: &HashMap<String, f64>,
    ts: i64,
) -> Result<()> {
    let equity = inv.equity(mids);
    for (tid, p) in &inv.pos {
        let mid = mids.get(tid);
        let unreal = mid.map(|m| (m - p.avg_cost) * p.qty).unwrap_or(0.0);
        repo::insert_position_snapshot(
            conn,
            run_id,
            tid,
            ts,
            p.qty,
            p.avg_cost,
            p.realized,
            unreal,
            inv.cash,
            equity,
            &json!({ "mid": mid }),
        )?;
    }
    Ok(())
}

/// Persist the PnL snapshot and the account-state row for this tick.
pub fn snapshot_pnl(
    conn: &Connection,
    run_id: &str,
    inv: &InventoryEngine,
    mids: &HashMap<String, f64>,
) -> Result<()> {
    let ts = now_ts();
    let (gross, realized, unreal) = inv.mark(mids);
    let equity = inv.equity(mids);

    let positions: serde_json::Value = inv
        .pos
        .iter()
        .map(|(tid, p)| {
            (
                tid.clone(),
                json!({ "qty": p.qty, "avg_cost": p.avg_cost, "realized": p.realized }),
            )
        })
        .collect::<serde_json::Map<String, serde_json::Value>>()
        .into();

    repo::insert_pnl_snapshot(
        conn,
        run_id,
        ts,
        gross,
        realized,
        unreal,
        inv.cash,
        equity,
        &json!({ "positions": positions }),
    )?;
    repo::upsert_account_state(conn, run_id, ts, inv.cash, equity, gross, &json!({}))?;
    Ok(())
}
