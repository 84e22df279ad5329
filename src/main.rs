//! Dynamic Hedge - Main Entry Point
//!
//! Runs the hedge engine against paper or Binance venues, or prints the
//! last persisted snapshot.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dynamic_hedge::config::{Config, VenueConfig, VenueKind};
use dynamic_hedge::exchange::{BinanceClient, MakerVenue, PaperVenue, TakerVenue, Venues};
use dynamic_hedge::persistence::{PersistedState, PersistenceManager};
use dynamic_hedge::risk::FixedEquity;
use dynamic_hedge::utils::SystemClock;
use dynamic_hedge::DynamicHedgeStrategy;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Dynamic Hedge CLI
#[derive(Parser)]
#[command(name = "dynamic-hedge")]
#[command(version, about = "Cross-venue dynamic hedging with leverage-based risk control")]
struct Cli {
    /// Emit JSON log lines instead of human-readable text
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hedge engine (default)
    Run,

    /// Show engine status from the persisted snapshot
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/hedge_state.db")]
        db: String,

        /// Show positions and recent hedge executions
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.json_logs)?;

    match cli.command {
        Some(Commands::Status { db, verbose }) => show_status(&db, verbose),
        Some(Commands::Run) | None => run().await,
    }
}

async fn run() -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║             Dynamic Hedge v{}                          ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load()?;
    if let Err(e) = config.validate() {
        error!("❌ Invalid configuration: {:#}", e);
        std::process::exit(1);
    }
    log_config(&config);

    let taker = build_taker(&config.taker, &config)?;
    let maker = build_maker(&config.maker, &config)?;
    let venues = Venues::new(taker, maker, config.execution.venue_call_timeout());

    let persistence = if config.persistence.enabled {
        let manager = PersistenceManager::new(&config.persistence.path)?;
        if let Ok(Some(previous)) = manager.load_state() {
            info!(
                "📂 [PERSISTENCE] Previous run: phase {}, {} trades, last saved {}",
                previous.phase,
                previous.total_trades,
                previous.last_saved.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Some(manager)
    } else {
        info!("📂 [PERSISTENCE] Disabled");
        None
    };

    let strategy = DynamicHedgeStrategy::new(
        venues,
        &config,
        Arc::new(FixedEquity(config.risk.reference_equity)),
        Arc::new(SystemClock),
    );
    strategy.start().context("Failed to start hedge strategy")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        signal.cancel();
    });

    info!("🚀 Hedge engine running, press Ctrl+C to stop");

    let snapshot_every = Duration::from_secs(config.persistence.snapshot_interval_secs.max(1));
    let mut snapshots = tokio::time::interval(snapshot_every);
    snapshots.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = snapshots.tick() => {
                if let Some(manager) = &persistence {
                    save_snapshot(manager, &strategy);
                }
            }
        }
    }

    strategy.stop().await;

    if let Some(manager) = &persistence {
        info!("💾 [PERSISTENCE] Saving final snapshot before shutdown...");
        save_snapshot(manager, &strategy);
    }

    info!("👋 Dynamic Hedge shutdown complete");
    Ok(())
}

fn build_taker(venue: &VenueConfig, config: &Config) -> Result<Arc<dyn TakerVenue>> {
    Ok(match venue.kind {
        VenueKind::Paper => Arc::new(PaperVenue::new("paper-taker", &config.paper)),
        VenueKind::Binance => Arc::new(BinanceClient::new(venue, &config.trading)?),
    })
}

fn build_maker(venue: &VenueConfig, config: &Config) -> Result<Arc<dyn MakerVenue>> {
    Ok(match venue.kind {
        VenueKind::Paper => Arc::new(PaperVenue::new("paper-maker", &config.paper)),
        VenueKind::Binance => Arc::new(BinanceClient::new(venue, &config.trading)?),
    })
}

fn save_snapshot(manager: &PersistenceManager, strategy: &DynamicHedgeStrategy) {
    let state = PersistedState::capture(
        &strategy.stats(),
        &strategy.execution_stats(),
        &strategy.position_summary(),
        Utc::now(),
    );
    if let Err(e) = manager.save_state(&state) {
        error!("❌ [PERSISTENCE] Failed to save state: {:#}", e);
    }

    let executions = strategy.recent_executions();
    if let Err(e) = manager.record_executions(&executions) {
        warn!(
            "⚠️  [PERSISTENCE] Failed to record {} hedge executions: {:#}",
            executions.len(),
            e
        );
    }
}

/// Initialize logging with file and console output.
fn init_logging(json: bool) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "dynamic-hedge.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    let filter = EnvFilter::from_default_env()
        .add_directive("dynamic_hedge=debug".parse()?)
        .add_directive(Level::INFO.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    if json {
        builder.json().init();
    } else {
        builder.with_ansi(true).init();
    }

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!(
        "   Venues: taker={:?} maker={:?}",
        config.taker.kind, config.maker.kind
    );
    let instruments: Vec<String> = config
        .trading
        .instruments
        .iter()
        .map(|i| format!("{} (maker {})", i.symbol, i.maker_direction))
        .collect();
    info!("   Instruments: {}", instruments.join(", "));
    info!("   Order Size: ${}", config.trading.order_size);
    info!(
        "   Leverage: max {}x, emergency {}x, stop after {}s",
        config.risk.max_leverage, config.risk.emergency_leverage, config.risk.stop_duration_secs
    );
    info!(
        "   Daily Target: ${} / {} trades (continuous: {})",
        config.strategy.volume_target,
        config.strategy.max_daily_trades,
        config.strategy.continuous_mode
    );
    info!(
        "   Balance: {} (tolerance {}%, min ${})",
        if config.balance.enabled { "on" } else { "off" },
        config.balance.tolerance_percent,
        config.balance.min_adjust_amount
    );
    info!(
        "   Execution: fast={} price_protection={} max_slippage={}% retries={}",
        config.execution.fast_execution,
        config.execution.price_protection,
        config.execution.max_slippage_percent,
        config.execution.max_retry_attempts
    );
}

/// Print the last persisted snapshot.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              DYNAMIC HEDGE STATUS                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The engine has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let Some(state) = persistence.load_state()? else {
        println!("\n❌ No saved state found in database.");
        println!("   The engine may not have run yet.");
        return Ok(());
    };

    println!("\n📊 Engine");
    println!("   ├─ Phase:            {}", state.phase);
    println!("   ├─ Started:          {}", state.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   └─ Last Updated:     {}", state.last_saved.format("%Y-%m-%d %H:%M:%S UTC"));

    println!("\n📈 Trading");
    println!("   ├─ Daily Volume:     ${:.2} ({} trades)", state.daily_volume, state.daily_trades);
    println!("   ├─ Target Progress:  {:.1}%", state.volume_progress);
    println!("   ├─ Total Volume:     ${:.2} ({} trades)", state.total_volume, state.total_trades);
    println!("   ├─ Open / Close:     {} / {}", state.opening_trades, state.closing_trades);
    match state.last_trade_time {
        Some(t) => println!("   └─ Last Trade:       {}", t.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("   └─ Last Trade:       never"),
    }

    let exec = &state.execution;
    let success_rate = if exec.total > 0 {
        exec.successful as f64 / exec.total as f64 * 100.0
    } else {
        0.0
    };
    println!("\n⚡ Hedge Execution");
    println!("   ├─ Executions:       {} ({:.1}% success, {} failed)", exec.total, success_rate, exec.failed);
    println!("   ├─ Delay:            avg {}ms, min {}ms, max {}ms", exec.avg_delay_ms, exec.min_delay_ms, exec.max_delay_ms);
    println!(
        "   └─ Histogram:        <100ms {} | 100-200ms {} | 200-500ms {} | >500ms {}",
        exec.under_100ms, exec.from_100_to_200ms, exec.from_200_to_500ms, exec.over_500ms
    );

    println!("\n⚖️  Leverage");
    println!("   ├─ Taker:            {:.2}x", state.taker_leverage);
    println!("   └─ Maker:            {:.2}x", state.maker_leverage);

    let open: Vec<_> = state.positions.iter().filter(|p| !p.notional_value.is_zero()).collect();
    println!("\n🔓 Open Positions: {}", open.len());
    if verbose {
        for pos in &open {
            println!(
                "   ├─ {:<6} {:<8} {:>14.2} notional ({} base)",
                pos.venue, pos.symbol, pos.notional_value, pos.signed_size
            );
        }

        let recent = persistence.get_recent_executions(10)?;
        if !recent.is_empty() {
            println!("\n🕒 Recent Hedges");
            for ctx in &recent {
                let outcome = if ctx.success {
                    "✅".to_string()
                } else {
                    format!("❌ {}", ctx.error.as_deref().unwrap_or("unknown error"))
                };
                println!(
                    "   ├─ {} {} {} ${:.2} on {} in {}ms {}",
                    ctx.timestamp.format("%H:%M:%S"),
                    ctx.symbol,
                    ctx.hedge_side,
                    ctx.size,
                    ctx.hedge_venue,
                    ctx.delay_ms,
                    outcome
                );
            }
        }
    }

    Ok(())
}
