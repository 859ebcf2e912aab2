//! Core enumerations and records shared across the engine.
//!
//! Orders, trades and risk rows cross the store boundary as tagged records
//! with explicit enumerations; JSON blobs stay opaque `serde_json::Value`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Order direction on the CLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle: NEW → PLACED → {PARTIAL* → FILLED} | CANCELED | REJECTED | ERROR.
/// Only PLACED/PARTIAL orders are held in the live tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Placed,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Error,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Placed => "PLACED",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a persisted risk event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Info,
    Warn,
    Error,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Info => "INFO",
            RiskLevel::Warn => "WARN",
            RiskLevel::Error => "ERROR",
        }
    }
}

/// A single passive quote produced by the spread quoter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub side: Side,
    pub price: f64,
    pub size: f64,
}
