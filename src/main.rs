//! `pmm` CLI: store init, universe refresh, the trading loop, and reports.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use uuid::Uuid;

use pm_maker::analytics::reports;
use pm_maker::config::{Mode, Settings};
use pm_maker::db::repo;
use pm_maker::db::schema::{connect, init_db};
use pm_maker::engine::{Engine, RunOutcome};
use pm_maker::execution::user_stream::{UserStream, UserStreamConfig};
use pm_maker::execution::venue::{LiveVenue, LiveVenueConfig, PaperVenue, VenueAdapter};
use pm_maker::logging;
use pm_maker::strategy::circuit_breaker::{CircuitBreaker, CircuitConfig};
use pm_maker::types::RiskLevel;
use pm_maker::util::now_ts;

#[derive(Parser)]
#[command(name = "pmm", version, about = "Passive market maker for binary prediction markets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persistent store maintenance
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
    /// Market universe maintenance
    Universe {
        #[command(subcommand)]
        cmd: UniverseCmd,
    },
    /// Start the trading loop
    Run {
        #[arg(value_enum)]
        mode: CliMode,
        #[arg(long)]
        run_id: Option<String>,
        /// Live mode: force the paper venue while still journaling
        #[arg(long)]
        dry_run: bool,
    },
    /// Print account, risk events, top markets and positions for a run
    Report {
        #[arg(long)]
        run_id: String,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Create the schema
    Init,
}

#[derive(Subcommand)]
enum UniverseCmd {
    /// Fetch and upsert the market universe
    Refresh,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Paper,
    Live,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // The positional mode wins over the environment before settings load.
    if let Commands::Run { mode, .. } = &cli.command {
        let m = match mode {
            CliMode::Paper => "paper",
            CliMode::Live => "live",
        };
        std::env::set_var("PMM_MODE", m);
    }
    let settings = Settings::from_env();
    let _log_guard = logging::init(&settings.log_level, settings.log_file.as_deref());

    match cli.command {
        Commands::Db { cmd: DbCmd::Init } => cmd_db_init(&settings),
        Commands::Universe {
            cmd: UniverseCmd::Refresh,
        } => cmd_universe_refresh(&settings).await,
        Commands::Run {
            run_id, dry_run, ..
        } => cmd_run(settings, run_id, dry_run).await,
        Commands::Report { run_id } => cmd_report(&settings, &run_id),
    }
}

fn cmd_db_init(settings: &Settings) -> Result<()> {
    let conn = connect(&settings.db_path)?;
    init_db(&conn)?;
    info!("store initialized: {}", settings.db_path);
    Ok(())
}

async fn cmd_universe_refresh(settings: &Settings) -> Result<()> {
    use pm_maker::market::gamma::GammaClient;
    use pm_maker::market::universe::fetch_top_liquidity_markets;

    let conn = connect(&settings.db_path)?;
    init_db(&conn)?;
    let gamma = GammaClient::new(&settings.gamma_host, settings.http_timeout_sec)?;
    let rows = fetch_top_liquidity_markets(
        &gamma,
        settings.universe_limit,
        &settings.universe_order_field,
        settings.universe_ascending,
        settings.only_active,
        settings.only_open,
    )
    .await?;
    repo::upsert_markets(&conn, &rows)?;
    info!("universe refreshed: {} markets", rows.len());
    Ok(())
}

async fn cmd_run(settings: Settings, run_id: Option<String>, dry_run: bool) -> Result<()> {
    let conn = connect(&settings.db_path)?;
    init_db(&conn)?;

    let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    repo::insert_run(
        &conn,
        &run_id,
        settings.mode.as_str(),
        &serde_json::to_value(&settings)?,
    )?;

    // Venue: paper in paper mode and for live --dry-run; live otherwise.
    let venue: Arc<dyn VenueAdapter> = match settings.mode {
        Mode::Paper => Arc::new(PaperVenue::new()),
        Mode::Live if dry_run => Arc::new(PaperVenue::new()),
        Mode::Live => {
            if !settings.has_l2_creds() {
                bail!("live mode requires PMM_API_KEY / PMM_API_SECRET / PMM_API_PASSPHRASE");
            }
            Arc::new(LiveVenue::new(LiveVenueConfig {
                host: settings.clob_host.clone(),
                api_key: settings.api_key.clone().unwrap_or_default(),
                api_secret: settings.api_secret.clone().unwrap_or_default(),
                api_passphrase: settings.api_passphrase.clone().unwrap_or_default(),
                timeout_sec: settings.http_timeout_sec,
            })?)
        }
    };
    let breaker = CircuitBreaker::new(CircuitConfig::from_env(venue.is_paper()));

    // User tape: live mode only, never under --dry-run.
    if settings.mode == Mode::Live && settings.enable_user_stream && !dry_run {
        if settings.has_l2_creds() {
            let markets = repo::list_universe(&conn, settings.universe_limit)?;
            let condition_ids: Vec<String> =
                markets.iter().map(|m| m.condition_id.clone()).collect();
            repo::insert_risk_event(
                &conn,
                &run_id,
                now_ts(),
                RiskLevel::Info,
                "WSS_USER_STARTED",
                "user tape started",
                &serde_json::json!({ "markets": condition_ids.len() }),
            )?;
            UserStream::new(UserStreamConfig {
                run_id: run_id.clone(),
                db_path: settings.db_path.clone(),
                wss_base: settings.wss_base.clone(),
                api_key: settings.api_key.clone().unwrap_or_default(),
                api_secret: settings.api_secret.clone().unwrap_or_default(),
                api_passphrase: settings.api_passphrase.clone().unwrap_or_default(),
                markets: condition_ids,
                ping_sec: settings.wss_ping_sec,
            })
            .spawn();
        } else {
            warn!("user tape requires L2 credentials; skipping");
            repo::insert_risk_event(
                &conn,
                &run_id,
                now_ts(),
                RiskLevel::Warn,
                "WSS_USER_DISABLED",
                "missing L2 credentials; skipping user tape",
                &serde_json::json!({}),
            )?;
        }
    }

    info!("run {} starting ({} dry_run={})", run_id, settings.mode.as_str(), dry_run);
    let mut engine = Engine::new(settings, run_id.clone(), conn, venue, breaker)?;
    match engine.run().await? {
        RunOutcome::Interrupted => {
            info!("run {} stopped cleanly", run_id);
            Ok(())
        }
        RunOutcome::Halted(reason) => bail!("circuit breaker halt: {}", reason),
    }
}

fn cmd_report(settings: &Settings, run_id: &str) -> Result<()> {
    let conn = connect(&settings.db_path)?;
    init_db(&conn)?;

    println!("== Account ==");
    match reports::latest_account(&conn, run_id)? {
        Some(a) => println!(
            "ts={} cash={:.2} equity={:.2} gross_exposure={:.2}",
            a.ts, a.cash, a.equity, a.gross_exposure
        ),
        None => println!("(no account state recorded)"),
    }

    println!("\n== Recent Risk Events ==");
    let events = reports::recent_risk_events(&conn, run_id, 30)?;
    if events.is_empty() {
        println!("(none)");
    }
    for e in events {
        println!("{} {:5} {:22} {}", e.ts, e.level, e.code, e.message);
    }

    println!("\n== Top Markets by Notional ==");
    let top = reports::top_markets_by_trade_notional(&conn, run_id, 10)?;
    if top.is_empty() {
        println!("(no trades)");
    }
    for m in top {
        println!("{:66} {:>12.2}", m.condition_id, m.notional);
    }

    println!("\n== Latest Positions ==");
    let positions = reports::latest_positions(&conn, run_id, 50)?;
    if positions.is_empty() {
        println!("(no positions)");
    }
    for p in positions {
        println!(
            "{:20} ts={} qty={:>10.3} avg={:.4} realized={:>9.4} unrealized={:>9.4} equity={:.2}",
            &p.token_id[..20.min(p.token_id.len())],
            p.ts,
            p.qty,
            p.avg_cost,
            p.realized_pnl,
            p.unrealized_pnl,
            p.equity
        );
    }
    Ok(())
}
