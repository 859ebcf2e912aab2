//! Public CLOB feed: midpoint, order book, tick size.
//!
//! Every call carries its own timeout and a single retry; failures degrade to
//! `None` so one bad token cannot fail a whole tick. The book parser accepts
//! both level encodings seen in the wild: `{price, size}` objects and
//! `[price, size]` pairs.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

pub struct ClobPublicClient {
    host: String,
    http: reqwest::Client,
}

/// Best bid/ask plus summed top-N depth extracted from a raw book payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookTop {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub depth_top: f64,
}

impl ClobPublicClient {
    pub fn new(host: &str, timeout_sec: f64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_sec.max(1.0)))
            .build()
            .context("build clob http client")?;
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get_json(&self, path: &str, token_id: &str) -> Option<Value> {
        let url = format!("{}{}", self.host, path);
        let mut last_err = None;
        for _ in 0..2 {
            match self
                .http
                .get(&url)
                .query(&[("token_id", token_id)])
                .send()
                .await
            {
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => match resp.json::<Value>().await {
                        Ok(v) => return Some(v),
                        Err(e) => last_err = Some(e.to_string()),
                    },
                    Err(e) => last_err = Some(e.to_string()),
                },
                Err(e) => last_err = Some(e.to_string()),
            }
        }
        warn!(
            "clob GET {} failed for token {}…: {}",
            path,
            &token_id[..8.min(token_id.len())],
            last_err.unwrap_or_default(),
        );
        None
    }

    pub async fn get_midpoint(&self, token_id: &str) -> Option<f64> {
        let v = self.get_json("/midpoint", token_id).await?;
        parse_num(v.get("mid")?)
    }

    pub async fn get_orderbook(&self, token_id: &str) -> Option<Value> {
        self.get_json("/book", token_id).await
    }

    pub async fn get_tick_size(&self, token_id: &str) -> Option<f64> {
        let v = self.get_json("/tick-size", token_id).await?;
        ["minimum_tick_size", "tick_size", "tickSize", "tick"]
            .iter()
            .find_map(|k| v.get(*k).and_then(parse_num))
    }
}

fn parse_num(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn level_price(level: &Value) -> Option<f64> {
    match level {
        Value::Object(o) => o.get("price").and_then(parse_num),
        Value::Array(a) => a.first().and_then(parse_num),
        _ => None,
    }
}

fn level_size(level: &Value) -> f64 {
    match level {
        Value::Object(o) => ["size", "amount", "quantity"]
            .iter()
            .find_map(|k| o.get(*k).and_then(parse_num))
            .unwrap_or(0.0),
        Value::Array(a) => a.get(1).and_then(parse_num).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Parse best bid/ask and summed top-N depth (bids + asks) from a raw book.
/// Level arrays are not assumed sorted; best is taken as max bid / min ask.
pub fn parse_book(book: Option<&Value>, top_levels: usize) -> BookTop {
    let Some(book) = book else {
        return BookTop::default();
    };
    let empty = Vec::new();
    let bids = book.get("bids").and_then(|v| v.as_array()).unwrap_or(&empty);
    let asks = book.get("asks").and_then(|v| v.as_array()).unwrap_or(&empty);

    let best_bid = bids
        .iter()
        .filter_map(level_price)
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
    let best_ask = asks
        .iter()
        .filter_map(level_price)
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));

    let n = top_levels.max(1);
    let depth_top: f64 = bids.iter().take(n).map(level_size).sum::<f64>()
        + asks.iter().take(n).map(level_size).sum::<f64>();

    BookTop {
        best_bid,
        best_ask,
        depth_top,
    }
}
