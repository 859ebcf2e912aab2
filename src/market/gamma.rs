//! Metadata discovery HTTP client.
//!
//! Thin JSON-over-HTTP wrapper: no SDK types, plain `serde_json::Value` rows
//! that the universe mapper turns into store records. One retry on transient
//! failure; the caller decides whether a refresh failure is fatal.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

pub struct GammaClient {
    host: String,
    http: reqwest::Client,
}

impl GammaClient {
    pub fn new(host: &str, timeout_sec: f64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(timeout_sec.max(1.0)))
            .build()
            .context("build gamma http client")?;
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Fetch raw market rows ordered by the given field.
    pub async fn get_markets(
        &self,
        limit: usize,
        offset: usize,
        active: Option<bool>,
        closed: Option<bool>,
        order: &str,
        ascending: bool,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/markets", self.host);
        let mut params: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("order", order.to_string()),
            ("ascending", ascending.to_string()),
        ];
        if let Some(a) = active {
            params.push(("active", a.to_string()));
        }
        if let Some(c) = closed {
            params.push(("closed", c.to_string()));
        }

        let mut last_err = None;
        for attempt in 0..2 {
            let res = self.http.get(&url).query(&params).send().await;
            match res {
                Ok(resp) => {
                    let resp = resp.error_for_status().context("gamma /markets status")?;
                    let rows: Vec<Value> = resp.json().await.context("parse gamma /markets")?;
                    debug!("gamma /markets attempt={} rows={}", attempt, rows.len());
                    return Ok(rows);
                }
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e).context("gamma /markets request"),
            None => anyhow::bail!("gamma /markets request failed"),
        }
    }
}
