//! pm-maker: passive market making for binary prediction markets.
//!
//! A polling control loop quotes two-sided around each market's midpoint,
//! manages the order lifecycle against the CLOB, simulates fills in paper
//! mode, adapts spread and cadence per market from fill/markout telemetry,
//! allocates a bounded gross budget across the universe, and halts on
//! reject/cancel/error bursts. Everything observable is journaled to SQLite.

pub mod analytics;
pub mod config;
pub mod db;
pub mod engine;
pub mod execution;
pub mod logging;
pub mod market;
pub mod strategy;
pub mod types;
pub mod util;
