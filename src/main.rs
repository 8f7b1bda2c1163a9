use anyhow::Context;
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use swingbot::api::{MarketData, TinkoffClient};
use swingbot::backtest::{MarketScenario, SimulationConfig, Simulator, SyntheticDataGenerator};
use swingbot::config::Settings;
use swingbot::db::{PostgresStore, SignalStore};
use swingbot::execution::{Liquidator, PositionManager, TradeExecutor};
use swingbot::ingest::CandleLoader;
use swingbot::models::Candle;
use swingbot::notify::{messages, Notifications, Outbox, TelegramClient};
use swingbot::strategy::{CycleSummary, SignalProcessor};
use swingbot::throttle::Throttle;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "swingbot", about = "Daily volatility-band swing trading assistant")]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch missing daily candles and compute bands
    Load,
    /// Run one signal cycle, send queued signals and a summary
    Signals {
        /// Evaluate as of this date instead of today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Send signals that have not been delivered yet
    Notify,
    /// Execute pending signals against the broker
    Trade,
    /// load, signals and trade in one go
    Run,
    /// Sell every open position at market
    CloseAll,
    /// Replay history through the full pipeline on a paper account
    Simulate {
        /// Instrument to simulate (defaults to the configured list)
        #[arg(short, long)]
        instrument: Option<String>,
        /// Calendar days of provider history, or trading days with --seed
        #[arg(long, default_value_t = 365)]
        days: usize,
        /// Use seeded synthetic candles instead of the provider
        #[arg(long)]
        seed: Option<u64>,
        /// Synthetic scenario: sideways, uptrend, downtrend, volatile
        #[arg(long, default_value = "volatile")]
        scenario: MarketScenario,
        #[arg(long, default_value_t = 1_000_000.0)]
        cash: f64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging();

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    tracing::info!(
        "🚀 swingbot starting: {} instrument(s), sandbox={}",
        settings.instruments.len(),
        settings.broker.sandbox
    );

    let notifications = build_notifications(&settings)?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::Load => {
            let store = connect_store(&settings).await?;
            let market = Arc::new(build_broker(&settings)?);
            guarded(&notifications, "Load", run_load(&settings, store, market, today)).await?;
        }
        Command::Signals { date } => {
            let store = connect_store(&settings).await?;
            let as_of = date.unwrap_or(today);
            guarded(
                &notifications,
                "Signal",
                run_signals(&settings, store, &notifications, as_of),
            )
            .await?;
        }
        Command::Notify => {
            let store = connect_store(&settings).await?;
            let report = Outbox::new(store, notifications.clone()).dispatch().await?;
            tracing::info!("📨 Sent {}, {} left queued", report.sent, report.failed);
        }
        Command::Trade => {
            let store = connect_store(&settings).await?;
            let broker = Arc::new(build_broker(&settings)?);
            guarded(
                &notifications,
                "Trading",
                run_trade(&settings, store, broker, &notifications),
            )
            .await?;
        }
        Command::Run => {
            let store = connect_store(&settings).await?;
            let broker = Arc::new(build_broker(&settings)?);
            guarded(
                &notifications,
                "Load",
                run_load(&settings, store.clone(), broker.clone(), today),
            )
            .await?;
            guarded(
                &notifications,
                "Signal",
                run_signals(&settings, store.clone(), &notifications, today),
            )
            .await?;
            guarded(
                &notifications,
                "Trading",
                run_trade(&settings, store, broker, &notifications),
            )
            .await?;
        }
        Command::CloseAll => {
            let store = connect_store(&settings).await?;
            let broker = Arc::new(build_broker(&settings)?);
            let liquidator = Liquidator::new(
                store,
                broker,
                notifications.clone(),
                PositionManager::from(&settings.execution),
            );
            let closed = guarded(&notifications, "Liquidation", liquidator.close_all()).await?;
            tracing::info!("🔻 Closed {} position(s)", closed.len());
        }
        Command::Simulate {
            instrument,
            days,
            seed,
            scenario,
            cash,
        } => {
            let instruments = match instrument {
                Some(i) => vec![i.trim().to_uppercase()],
                None => settings.instruments.clone(),
            };
            let history = simulation_history(&settings, &instruments, days, seed, scenario, today)
                .await?;

            let simulator = Simulator::new(SimulationConfig::from_settings(&settings, cash));
            let report = simulator.run(&history).await?;
            report.metrics.print_report();
        }
    }

    Ok(())
}

// ============================================================================
// Cycles
// ============================================================================

async fn run_load(
    settings: &Settings,
    store: Arc<dyn SignalStore>,
    market: Arc<TinkoffClient>,
    today: NaiveDate,
) -> swingbot::Result<()> {
    let loader = CandleLoader::new(
        store,
        market,
        settings.indicators,
        settings.ingest.history_days,
    );
    let report = loader.load_all(&settings.instruments, today).await?;
    for (instrument, reason) in &report.skipped {
        tracing::warn!("  {} skipped: {}", instrument, reason);
    }
    Ok(())
}

async fn run_signals(
    settings: &Settings,
    store: Arc<dyn SignalStore>,
    notifications: &Notifications,
    as_of: NaiveDate,
) -> swingbot::Result<CycleSummary> {
    let processor = SignalProcessor::new(store.clone(), settings.signals.lookback_days);
    let mut ctx = processor.recover().await?;
    let summary = processor
        .run_cycle(&mut ctx, &settings.instruments, as_of)
        .await?;

    let dispatched = Outbox::new(store, notifications.clone()).dispatch().await?;
    if dispatched.failed > 0 {
        tracing::warn!("⚠️  {} signal message(s) left queued", dispatched.failed);
    }
    notifications
        .send(&messages::cycle_summary(&summary, as_of))
        .await;

    Ok(summary)
}

async fn run_trade(
    settings: &Settings,
    store: Arc<dyn SignalStore>,
    broker: Arc<TinkoffClient>,
    notifications: &Notifications,
) -> swingbot::Result<()> {
    let executor = TradeExecutor::new(
        store,
        broker,
        notifications.clone(),
        PositionManager::from(&settings.execution),
        settings.execution.lookback_days,
    );
    let report = executor.run_cycle(&settings.instruments).await?;
    tracing::info!("💹 {} trade(s) executed", report.trades());
    Ok(())
}

/// Run a cycle; on failure tell the operator before returning the error
async fn guarded<T>(
    notifications: &Notifications,
    stage: &str,
    cycle: impl std::future::Future<Output = swingbot::Result<T>>,
) -> anyhow::Result<T> {
    match cycle.await {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::error!("🛑 {} cycle aborted: {}", stage, e);
            notifications
                .send(&messages::cycle_aborted(stage, &e.to_string()))
                .await;
            Err(anyhow::Error::new(e).context(format!("{} cycle aborted", stage)))
        }
    }
}

async fn simulation_history(
    settings: &Settings,
    instruments: &[String],
    days: usize,
    seed: Option<u64>,
    scenario: MarketScenario,
    today: NaiveDate,
) -> anyhow::Result<Vec<Candle>> {
    let mut history = Vec::new();

    if let Some(seed) = seed {
        let start = today - Duration::days(days as i64 * 7 / 5 + 7);
        for (i, instrument) in instruments.iter().enumerate() {
            let mut generator = SyntheticDataGenerator::new(seed.wrapping_add(i as u64));
            history.extend(generator.generate(instrument, scenario, start, days));
        }
        tracing::info!("🎲 Generated {} synthetic candles (seed {})", history.len(), seed);
        return Ok(history);
    }

    let market = build_broker(settings)?;
    let from = today - Duration::days(days as i64);
    for instrument in instruments {
        let candles = market
            .fetch_daily_candles(instrument, from, today)
            .await
            .with_context(|| format!("failed to fetch history for {}", instrument))?;
        tracing::info!("📥 {}: {} candles for simulation", instrument, candles.len());
        history.extend(candles);
    }
    Ok(history)
}

// ============================================================================
// Setup
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("swingbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_store(settings: &Settings) -> anyhow::Result<Arc<dyn SignalStore>> {
    let store = PostgresStore::new(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;
    tracing::info!("✅ Connected to Postgres");
    Ok(Arc::new(store))
}

fn build_broker(settings: &Settings) -> anyhow::Result<TinkoffClient> {
    let client = TinkoffClient::new(
        &settings.broker,
        Throttle::from_millis(settings.execution.order_delay_ms),
    )
    .context("failed to build broker client")?;
    Ok(client)
}

fn build_notifications(settings: &Settings) -> anyhow::Result<Notifications> {
    let telegram = &settings.telegram;
    if !telegram.is_configured() {
        tracing::warn!("⚠️  Telegram not configured, operator messages are disabled");
        return Ok(Notifications::disabled());
    }

    let client = TelegramClient::new(telegram).context("failed to build Telegram client")?;
    Ok(Notifications::new(
        Arc::new(client),
        telegram.message_prefix.clone(),
        Throttle::from_millis(telegram.send_delay_ms),
    ))
}
