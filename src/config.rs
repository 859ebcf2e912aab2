//! Runtime settings, loaded from environment variables with struct defaults.
//!
//! Every knob has a `PMM_*` variable; `.env` is read at startup so a checked-in
//! example file can serve as the baseline. Unparseable values fall back to the
//! default rather than aborting.

use std::env;

use serde::Serialize;

// ─────────────────────────────────────────────────────────
// Env helpers
// ─────────────────────────────────────────────────────────

fn env_str(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => {
            let v = v.to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no" || v == "off")
        }
        Err(_) => default,
    }
}

// ─────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────

/// Execution mode for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Paper,
    Live,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Paper => "paper",
            Mode::Live => "live",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Some(Mode::Paper),
            "live" => Some(Mode::Live),
            _ => None,
        }
    }
}

/// Where the simulator applies the wide-spread penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadMode {
    /// Penalty multiplies the per-order fill probability.
    Factor,
    /// Penalty is folded into the arrival intensity λ (not re-applied per order).
    Intensity,
}

/// How the simulator's depth reference is maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthRefMode {
    /// Rolling quantile of observed top-depth samples, EMA-smoothed.
    Quantile,
    /// Fixed reference from configuration.
    Static,
}

// ─────────────────────────────────────────────────────────
// Paper simulator configuration
// ─────────────────────────────────────────────────────────

/// Knobs for the stochastic fill model (paper / dry-run only).
#[derive(Debug, Clone, Serialize)]
pub struct SimConfig {
    pub enabled: bool,
    /// Base Poisson arrival rate per second.
    pub fill_intensity: f64,
    pub intensity_adapt: bool,
    pub depth_ref_mode: DepthRefMode,
    pub depth_ref_quantile: f64,
    pub depth_ref_static: f64,
    pub depth_ref_min: f64,
    pub depth_ref_max: f64,
    pub depth_ref_ema: f64,
    pub depth_levels: usize,
    pub spread_mode: SpreadMode,
    pub spread_k: f64,
    pub markout_sigma_bps: f64,
    pub partial_fill: bool,
    pub full_fill_prob: f64,
    pub partial_beta_a: f64,
    pub partial_beta_b: f64,
    pub partial_min_frac: f64,
    pub partial_max_frac: f64,
    pub intensity_min: f64,
    pub intensity_max: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fill_intensity: 0.003,
            intensity_adapt: true,
            depth_ref_mode: DepthRefMode::Quantile,
            depth_ref_quantile: 0.70,
            depth_ref_static: 2000.0,
            depth_ref_min: 200.0,
            depth_ref_max: 50_000.0,
            depth_ref_ema: 0.80,
            depth_levels: 3,
            spread_mode: SpreadMode::Intensity,
            spread_k: 0.6,
            markout_sigma_bps: 20.0,
            partial_fill: true,
            full_fill_prob: 0.35,
            partial_beta_a: 2.0,
            partial_beta_b: 6.0,
            partial_min_frac: 0.05,
            partial_max_frac: 0.60,
            intensity_min: 0.0005,
            intensity_max: 0.05,
        }
    }
}

impl SimConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let spread_mode = match env_str("PMM_PAPER_SPREAD_MODE", "intensity")
            .to_ascii_lowercase()
            .as_str()
        {
            "factor" => SpreadMode::Factor,
            _ => SpreadMode::Intensity,
        };
        let depth_ref_mode = match env_str("PMM_PAPER_DEPTH_REF_MODE", "quantile")
            .to_ascii_lowercase()
            .as_str()
        {
            "static" => DepthRefMode::Static,
            _ => DepthRefMode::Quantile,
        };
        Self {
            enabled: env_bool("PMM_PAPER_SIM_ENABLE", d.enabled),
            fill_intensity: env_f64("PMM_PAPER_FILL_INTENSITY", d.fill_intensity),
            intensity_adapt: env_bool("PMM_PAPER_INTENSITY_ADAPT", d.intensity_adapt),
            depth_ref_mode,
            depth_ref_quantile: env_f64("PMM_PAPER_DEPTH_REF_QUANTILE", d.depth_ref_quantile),
            depth_ref_static: env_f64("PMM_PAPER_DEPTH_REF", d.depth_ref_static),
            depth_ref_min: env_f64("PMM_PAPER_DEPTH_REF_MIN", d.depth_ref_min),
            depth_ref_max: env_f64("PMM_PAPER_DEPTH_REF_MAX", d.depth_ref_max),
            depth_ref_ema: env_f64("PMM_PAPER_DEPTH_REF_EMA", d.depth_ref_ema),
            depth_levels: env_usize("PMM_PAPER_DEPTH_LEVELS", d.depth_levels),
            spread_mode,
            spread_k: env_f64("PMM_PAPER_SPREAD_K", d.spread_k),
            markout_sigma_bps: env_f64("PMM_PAPER_MARKOUT_SIGMA_BPS", d.markout_sigma_bps),
            partial_fill: env_bool("PMM_PAPER_PARTIAL_FILL", d.partial_fill),
            full_fill_prob: env_f64("PMM_PAPER_FULL_FILL_PROB", d.full_fill_prob),
            partial_beta_a: env_f64("PMM_PAPER_PARTIAL_BETA_A", d.partial_beta_a),
            partial_beta_b: env_f64("PMM_PAPER_PARTIAL_BETA_B", d.partial_beta_b),
            partial_min_frac: env_f64("PMM_PAPER_PARTIAL_MIN_FRAC", d.partial_min_frac),
            partial_max_frac: env_f64("PMM_PAPER_PARTIAL_MAX_FRAC", d.partial_max_frac),
            intensity_min: env_f64("PMM_PAPER_INTENSITY_MIN", d.intensity_min),
            intensity_max: env_f64("PMM_PAPER_INTENSITY_MAX", d.intensity_max),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────

/// Full runtime configuration. Serialized into `runs.config_json` at start.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    // Core
    pub mode: Mode,
    pub db_path: String,
    pub log_level: String,
    pub log_file: Option<String>,

    // Universe (metadata service)
    pub gamma_host: String,
    pub universe_limit: usize,
    pub universe_order_field: String,
    pub universe_ascending: bool,
    pub only_active: bool,
    pub only_open: bool,

    // Public feed / venue
    pub clob_host: String,
    pub http_timeout_sec: f64,

    // L2 credentials (live venue + user tape)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    #[serde(skip_serializing)]
    pub api_passphrase: Option<String>,

    // Accounting
    pub starting_cash: f64,

    // Risk / sizing
    pub alpha: f64,
    pub max_usd_per_market: f64,
    pub min_usd_per_market: f64,
    pub max_gross_usd: f64,
    pub post_only: bool,

    // Quoting
    pub target_spread_bps: f64,
    pub quote_refresh_sec: f64,
    pub cancel_reprice_sec: f64,
    pub max_orders_per_market: usize,

    // Capital allocation
    pub enable_allocator: bool,
    pub alloc_liquidity_power: f64,
    pub alloc_quality_k: f64,

    // User tape
    pub enable_user_stream: bool,
    pub wss_base: String,
    pub wss_ping_sec: u64,

    // Paper simulator
    pub sim: SimConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Paper,
            db_path: "./data/pmm.sqlite".into(),
            log_level: "info".into(),
            log_file: None,
            gamma_host: "https://gamma-api.polymarket.com".into(),
            universe_limit: 50,
            universe_order_field: "liquidityNum".into(),
            universe_ascending: false,
            only_active: true,
            only_open: true,
            clob_host: "https://clob.polymarket.com".into(),
            http_timeout_sec: 5.0,
            api_key: None,
            api_secret: None,
            api_passphrase: None,
            starting_cash: 1000.0,
            alpha: 1.5,
            max_usd_per_market: 50.0,
            min_usd_per_market: 5.0,
            max_gross_usd: 500.0,
            post_only: true,
            target_spread_bps: 60.0,
            quote_refresh_sec: 3.0,
            cancel_reprice_sec: 15.0,
            max_orders_per_market: 2,
            enable_allocator: true,
            alloc_liquidity_power: 0.5,
            alloc_quality_k: 2.0,
            enable_user_stream: true,
            wss_base: "wss://ws-subscriptions-clob.polymarket.com".into(),
            wss_ping_sec: 10,
            sim: SimConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Self::default();
        let mode = env::var("PMM_MODE")
            .ok()
            .and_then(|v| Mode::parse(&v))
            .unwrap_or(d.mode);
        Self {
            mode,
            db_path: env_str("PMM_DB_PATH", &d.db_path),
            log_level: env_str("PMM_LOG_LEVEL", &d.log_level),
            log_file: env_opt("PMM_LOG_FILE"),
            gamma_host: env_str("PMM_GAMMA_HOST", &d.gamma_host),
            universe_limit: env_usize("PMM_UNIVERSE_LIMIT", d.universe_limit),
            universe_order_field: env_str("PMM_UNIVERSE_ORDER_FIELD", &d.universe_order_field),
            universe_ascending: env_bool("PMM_UNIVERSE_ASCENDING", d.universe_ascending),
            only_active: env_bool("PMM_ONLY_ACTIVE", d.only_active),
            only_open: env_bool("PMM_ONLY_OPEN", d.only_open),
            clob_host: env_str("PMM_CLOB_HOST", &d.clob_host),
            http_timeout_sec: env_f64("PMM_HTTP_TIMEOUT_SEC", d.http_timeout_sec),
            api_key: env_opt("PMM_API_KEY"),
            api_secret: env_opt("PMM_API_SECRET"),
            api_passphrase: env_opt("PMM_API_PASSPHRASE"),
            starting_cash: env_f64("PMM_STARTING_CASH", d.starting_cash),
            alpha: env_f64("PMM_ALPHA", d.alpha),
            max_usd_per_market: env_f64("PMM_MAX_USD_PER_MARKET", d.max_usd_per_market),
            min_usd_per_market: env_f64("PMM_MIN_USD_PER_MARKET", d.min_usd_per_market),
            max_gross_usd: env_f64("PMM_MAX_GROSS_USD", d.max_gross_usd),
            post_only: env_bool("PMM_POST_ONLY", d.post_only),
            target_spread_bps: env_f64("PMM_TARGET_SPREAD_BPS", d.target_spread_bps),
            quote_refresh_sec: env_f64("PMM_QUOTE_REFRESH_SEC", d.quote_refresh_sec),
            cancel_reprice_sec: env_f64("PMM_CANCEL_REPRICE_SEC", d.cancel_reprice_sec),
            max_orders_per_market: env_usize("PMM_MAX_ORDERS_PER_MARKET", d.max_orders_per_market),
            enable_allocator: env_bool("PMM_ENABLE_ALLOCATOR", d.enable_allocator),
            alloc_liquidity_power: env_f64("PMM_ALLOC_LIQUIDITY_POWER", d.alloc_liquidity_power),
            alloc_quality_k: env_f64("PMM_ALLOC_QUALITY_K", d.alloc_quality_k),
            enable_user_stream: env_bool("PMM_ENABLE_WSS_USER", d.enable_user_stream),
            wss_base: env_str("PMM_WSS_BASE", &d.wss_base),
            wss_ping_sec: env_u64("PMM_WSS_PING_SEC", d.wss_ping_sec),
            sim: SimConfig::from_env(),
        }
    }

    pub fn has_l2_creds(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some() && self.api_passphrase.is_some()
    }
}
