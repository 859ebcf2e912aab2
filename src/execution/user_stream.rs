//! Authenticated user tape: the push channel for real trade and order events.
//!
//! Runs on its own task with its own store connection; the loop never shares
//! memory with it and picks fills up by scanning newly written trade rows.
//! Reconnects with exponential backoff capped at 30 s.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use rusqlite::Connection;
use serde_json::{json, Value};
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::db::repo::{self, TradeRow};
use crate::db::schema::{connect, init_db};
use crate::types::Side;
use crate::util::now_ts;

#[derive(Debug, Clone)]
pub struct UserStreamConfig {
    pub run_id: String,
    pub db_path: String,
    pub wss_base: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    /// Condition ids to subscribe for.
    pub markets: Vec<String>,
    pub ping_sec: u64,
}

pub struct UserStream {
    cfg: UserStreamConfig,
}

fn num_or_str(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn str_field<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| data.get(*k).and_then(|v| v.as_str()))
}

impl UserStream {
    pub fn new(cfg: UserStreamConfig) -> Self {
        Self { cfg }
    }

    /// Spawn the ingester task. It owns its own connection and runs until the
    /// process exits.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let conn = match connect(&self.cfg.db_path).and_then(|c| {
            init_db(&c)?;
            Ok(c)
        }) {
            Ok(c) => c,
            Err(e) => {
                warn!("user tape: cannot open store, tape disabled: {:#}", e);
                return;
            }
        };
        let conn = Arc::new(Mutex::new(conn));

        info!("user tape started (markets={})", self.cfg.markets.len());
        let mut backoff = 1u64;
        loop {
            match self.connect_and_listen(&conn).await {
                Ok(()) => {
                    info!("user tape connection closed");
                    backoff = 1;
                }
                Err(e) => {
                    warn!("user tape error: {:#}", e);
                }
            }
            sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(30);
        }
    }

    async fn connect_and_listen(&self, conn: &Arc<Mutex<Connection>>) -> Result<()> {
        let url = Url::parse(&format!(
            "{}/ws/user",
            self.cfg.wss_base.trim_end_matches('/')
        ))
        .context("user tape url")?;

        let (ws, _resp) = timeout(Duration::from_secs(10), connect_async(url.as_str()))
            .await
            .context("user tape connect timeout")?
            .context("user tape connect")?;
        let (mut write, mut read) = ws.split();

        let subscribe = json!({
            "type": "user",
            "auth": {
                "apiKey": self.cfg.api_key,
                "secret": self.cfg.api_secret,
                "passphrase": self.cfg.api_passphrase,
            },
            "markets": self.cfg.markets,
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        info!("user tape subscribed (markets={})", self.cfg.markets.len());

        // Keepalive; the server answers PONG which we drop below.
        let ping_sec = self.cfg.ping_sec.max(1);
        let ping = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(ping_sec));
            loop {
                tick.tick().await;
                if write.send(Message::Text("PING".into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if text == "PONG" || text == "PING" {
                        continue;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    let events = match value {
                        Value::Array(arr) => arr,
                        other => vec![other],
                    };
                    for ev in &events {
                        let guard = conn.lock().expect("user tape db mutex poisoned");
                        if let Err(e) = self.handle_event(&guard, ev) {
                            warn!("user tape event dropped: {:#}", e);
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    warn!("user tape closed by server");
                    break;
                }
                Err(e) => {
                    warn!("user tape read error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        ping.abort();
        Ok(())
    }

    /// Record the raw event; trades feed the trades table, order events update
    /// order rows by venue id.
    pub fn handle_event(&self, conn: &Connection, data: &Value) -> Result<()> {
        let event_type = str_field(data, &["event_type", "type"]).unwrap_or("unknown").to_string();
        let event_id = str_field(data, &["id", "taker_order_id"])
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let ts = num_or_str(data.get("timestamp"))
            .or_else(|| num_or_str(data.get("matchtime")))
            .map(|t| t as i64)
            .unwrap_or_else(now_ts);

        repo::insert_user_event(conn, &self.cfg.run_id, &event_id, &event_type, ts, data)?;

        let is_trade = event_type.eq_ignore_ascii_case("trade");
        if is_trade {
            repo::insert_trade(
                conn,
                &TradeRow {
                    run_id: self.cfg.run_id.clone(),
                    trade_id: str_field(data, &["id"]).unwrap_or(&event_id).to_string(),
                    venue_order_id: str_field(data, &["taker_order_id"]).map(str::to_string),
                    condition_id: str_field(data, &["market"]).map(str::to_string),
                    token_id: str_field(data, &["asset_id"]).map(str::to_string),
                    side: str_field(data, &["side"]).and_then(Side::parse),
                    price: num_or_str(data.get("price")),
                    size: num_or_str(data.get("size")),
                    status: str_field(data, &["status"]).map(str::to_string),
                    ts,
                    raw: data.clone(),
                },
            )?;
            return Ok(());
        }

        if event_type.eq_ignore_ascii_case("order") {
            if let Some(venue_order_id) = str_field(data, &["id"]) {
                let status = str_field(data, &["type"]).unwrap_or("UPDATE");
                repo::update_order_status_by_venue_id(
                    conn,
                    &self.cfg.run_id,
                    venue_order_id,
                    status,
                    ts,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::connect_memory;

    fn stream() -> UserStream {
        UserStream::new(UserStreamConfig {
            run_id: "r".into(),
            db_path: ":memory:".into(),
            wss_base: "wss://example.invalid".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            api_passphrase: "p".into(),
            markets: vec!["cond".into()],
            ping_sec: 10,
        })
    }

    #[test]
    fn test_trade_event_lands_in_trades_and_tape() {
        let conn = connect_memory();
        let us = stream();
        let ev = json!({
            "event_type": "trade",
            "id": "tr-1",
            "taker_order_id": "v-9",
            "market": "cond",
            "asset_id": "tok",
            "side": "BUY",
            "price": "0.45",
            "size": 12.0,
            "status": "MATCHED",
            "timestamp": 1700000000u64,
        });
        us.handle_event(&conn, &ev).unwrap();

        let (price, size, ts): (f64, f64, i64) = conn
            .query_row(
                "SELECT price, size, ts FROM trades WHERE trade_id='tr-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert!((price - 0.45).abs() < 1e-9);
        assert!((size - 12.0).abs() < 1e-9);
        assert_eq!(ts, 1_700_000_000);

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM tape_user_events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_order_event_updates_order_row() {
        let conn = connect_memory();
        let us = stream();
        crate::db::repo::upsert_order(
            &conn,
            &crate::db::repo::OrderRow {
                run_id: "r".into(),
                local_order_id: "lo-1".into(),
                venue_order_id: Some("v-1".into()),
                condition_id: Some("cond".into()),
                token_id: "tok".into(),
                side: Side::Buy,
                price: 0.5,
                size: 10.0,
                post_only: true,
                status: crate::types::OrderStatus::Placed,
                created_ts: 10,
                updated_ts: 10,
                meta: json!({}),
            },
        )
        .unwrap();

        let ev = json!({
            "event_type": "order",
            "id": "v-1",
            "type": "CANCELLATION",
            "timestamp": 20,
        });
        us.handle_event(&conn, &ev).unwrap();
        let (status, ts): (String, i64) = conn
            .query_row(
                "SELECT status, updated_ts FROM orders WHERE local_order_id='lo-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "CANCELLATION");
        assert_eq!(ts, 20);
    }

    #[test]
    fn test_unknown_event_only_hits_tape() {
        let conn = connect_memory();
        let us = stream();
        us.handle_event(&conn, &json!({"something": "else"})).unwrap();
        let tape: i64 = conn
            .query_row("SELECT COUNT(*) FROM tape_user_events", [], |r| r.get(0))
            .unwrap();
        let trades: i64 = conn
            .query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tape, 1);
        assert_eq!(trades, 0);
    }
}
