//! Venue adapters: the place/cancel capability set.
//!
//! Two variants: an in-process paper venue that accepts everything (fills are
//! produced by the simulator in the order manager), and a live REST venue with
//! HMAC-signed L2 headers. `is_paper` gates simulation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use crate::types::Side;

/// Outcome of a place call. `raw` carries venue details; a `raw.action` of
/// `"SKIP"` marks a no-op place that must not count as a placement.
#[derive(Debug, Clone, Default)]
pub struct PlaceResult {
    pub success: bool,
    pub venue_order_id: Option<String>,
    pub error: Option<String>,
    pub raw: Option<Value>,
}

impl PlaceResult {
    pub fn is_skip(&self) -> bool {
        self.raw
            .as_ref()
            .and_then(|r| r.get("action"))
            .and_then(|a| a.as_str())
            == Some("SKIP")
    }

    pub fn skip(existing_venue_id: &str) -> Self {
        Self {
            success: true,
            venue_order_id: Some(existing_venue_id.to_string()),
            error: None,
            raw: Some(json!({ "action": "SKIP" })),
        }
    }
}

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn place_limit(
        &self,
        token_id: &str,
        side: Side,
        price: f64,
        size: f64,
        post_only: bool,
        meta: &Value,
    ) -> PlaceResult;

    async fn cancel(&self, venue_order_id: &str) -> bool;

    /// Simulation-capable adapters return true; the order manager only runs
    /// the fill simulator against these.
    fn is_paper(&self) -> bool;
}

// ─────────────────────────────────────────────────────────
// Paper venue
// ─────────────────────────────────────────────────────────

/// Accepts every order and cancel; fills come from the simulator.
#[derive(Default)]
pub struct PaperVenue {
    seq: AtomicU64,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    async fn place_limit(
        &self,
        _token_id: &str,
        _side: Side,
        _price: f64,
        _size: f64,
        _post_only: bool,
        _meta: &Value,
    ) -> PlaceResult {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        PlaceResult {
            success: true,
            venue_order_id: Some(format!("sim-{}-{}", n, Uuid::new_v4())),
            error: None,
            raw: Some(json!({ "paper": true })),
        }
    }

    async fn cancel(&self, _venue_order_id: &str) -> bool {
        true
    }

    fn is_paper(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────
// Live venue
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LiveVenueConfig {
    pub host: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub timeout_sec: f64,
}

/// REST venue with HMAC-SHA256 L2 request signing.
pub struct LiveVenue {
    cfg: LiveVenueConfig,
    http: reqwest::Client,
}

impl LiveVenue {
    pub fn new(cfg: LiveVenueConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(cfg.timeout_sec.max(1.0)))
            .build()
            .context("build live venue http client")?;
        Ok(Self { cfg, http })
    }

    /// Signature over `timestamp + method + path + body`, base64-encoded.
    fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.cfg.api_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(format!("{}{}{}{}", timestamp, method, path, body).as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn auth_headers(
        &self,
        req: reqwest::RequestBuilder,
        method: &str,
        path: &str,
        body: &str,
    ) -> reqwest::RequestBuilder {
        let ts = crate::util::now_ts();
        req.header("POLY-API-KEY", &self.cfg.api_key)
            .header("POLY-PASSPHRASE", &self.cfg.api_passphrase)
            .header("POLY-TIMESTAMP", ts.to_string())
            .header("POLY-SIGNATURE", self.sign(ts, method, path, body))
    }
}

#[async_trait]
impl VenueAdapter for LiveVenue {
    async fn place_limit(
        &self,
        token_id: &str,
        side: Side,
        price: f64,
        size: f64,
        post_only: bool,
        meta: &Value,
    ) -> PlaceResult {
        let body = json!({
            "tokenID": token_id,
            "side": side.as_str(),
            "price": price,
            "size": size,
            "orderType": "GTC",
            "postOnly": post_only,
            "meta": meta,
        });
        let body_str = body.to_string();
        let url = format!("{}/order", self.cfg.host.trim_end_matches('/'));
        let req = self
            .auth_headers(self.http.post(&url), "POST", "/order", &body_str)
            .header("Content-Type", "application/json")
            .body(body_str);

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("place_limit transport error: {}", e);
                return PlaceResult {
                    success: false,
                    venue_order_id: None,
                    error: Some(e.to_string()),
                    raw: Some(json!({ "exception": e.to_string() })),
                };
            }
        };
        let raw: Value = resp.json().await.unwrap_or_else(|_| json!({}));
        let ok = raw.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        if !ok {
            let err = raw
                .get("errorMsg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            return PlaceResult {
                success: false,
                venue_order_id: None,
                error: Some(err),
                raw: Some(raw),
            };
        }
        let venue_order_id = raw
            .get("orderId")
            .or_else(|| raw.get("orderID"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        PlaceResult {
            success: true,
            venue_order_id,
            error: None,
            raw: Some(raw),
        }
    }

    async fn cancel(&self, venue_order_id: &str) -> bool {
        let body = json!({ "orderID": venue_order_id }).to_string();
        let url = format!("{}/order", self.cfg.host.trim_end_matches('/'));
        let req = self
            .auth_headers(self.http.delete(&url), "DELETE", "/order", &body)
            .header("Content-Type", "application/json")
            .body(body);
        match req.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("cancel transport error: {}", e);
                false
            }
        }
    }

    fn is_paper(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paper_venue_accepts_and_ids_are_unique() {
        let v = PaperVenue::new();
        let a = v
            .place_limit("tok", Side::Buy, 0.5, 10.0, true, &json!({}))
            .await;
        let b = v
            .place_limit("tok", Side::Sell, 0.6, 10.0, true, &json!({}))
            .await;
        assert!(a.success && b.success);
        assert_ne!(a.venue_order_id, b.venue_order_id);
        assert!(!a.is_skip());
        assert!(v.cancel("anything").await);
    }

    #[test]
    fn test_skip_marker() {
        let r = PlaceResult::skip("v-1");
        assert!(r.success);
        assert!(r.is_skip());
        assert_eq!(r.venue_order_id.as_deref(), Some("v-1"));
    }
}
