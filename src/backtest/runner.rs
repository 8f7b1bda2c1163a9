use crate::api::{MarketData, PaperBroker};
use crate::backtest::metrics::SimulationMetrics;
use crate::config::Settings;
use crate::db::{MemoryStore, SignalStore};
use crate::execution::{PositionManager, TradeExecutor};
use crate::indicators::BandConfig;
use crate::ingest::CandleLoader;
use crate::models::{Candle, Signal, SignalKind};
use crate::notify::Notifications;
use crate::strategy::SignalProcessor;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Serves a fixed candle history through the provider interface
pub struct ReplayFeed {
    candles: BTreeMap<String, Vec<Candle>>,
}

impl ReplayFeed {
    pub fn new(history: &[Candle]) -> Self {
        let mut candles: BTreeMap<String, Vec<Candle>> = BTreeMap::new();
        for candle in history {
            candles
                .entry(candle.instrument.clone())
                .or_default()
                .push(candle.clone());
        }
        for series in candles.values_mut() {
            series.sort_by_key(|c| c.date);
            series.dedup_by_key(|c| c.date);
        }
        Self { candles }
    }

    pub fn instruments(&self) -> Vec<String> {
        self.candles.keys().cloned().collect()
    }

    /// Every trading date present in the history, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        let dates: BTreeSet<NaiveDate> = self
            .candles
            .values()
            .flat_map(|series| series.iter().map(|c| c.date))
            .collect();
        dates.into_iter().collect()
    }

    fn close_on(&self, instrument: &str, date: NaiveDate) -> Option<f64> {
        self.candles
            .get(instrument)?
            .iter()
            .find(|c| c.date == date)
            .map(|c| c.close)
    }
}

#[async_trait]
impl MarketData for ReplayFeed {
    async fn fetch_daily_candles(
        &self,
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let series = self
            .candles
            .get(instrument)
            .ok_or_else(|| Error::InstrumentNotFound(instrument.to_string()))?;
        Ok(series
            .iter()
            .filter(|c| c.date >= from && c.date <= to)
            .cloned()
            .collect())
    }
}

/// Parameters of a simulated run
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub initial_cash: f64,
    pub bands: BandConfig,
    pub signal_lookback: usize,
    pub execution_lookback: usize,
    pub positions: PositionManager,
}

impl SimulationConfig {
    pub fn from_settings(settings: &Settings, initial_cash: f64) -> Self {
        Self {
            initial_cash,
            bands: settings.indicators,
            signal_lookback: settings.signals.lookback_days,
            execution_lookback: settings.execution.lookback_days,
            positions: PositionManager::from(&settings.execution),
        }
    }
}

/// Result of a simulated run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub days: usize,
    pub signals: Vec<Signal>,
    pub metrics: SimulationMetrics,
}

impl SimulationReport {
    pub fn signal_count(&self, kind: SignalKind) -> usize {
        self.signals.iter().filter(|s| s.kind == kind).count()
    }
}

/// Replays a history day by day through load, signal and execution cycles
///
/// Uses the in-memory store and the paper broker. The signal context is
/// rebuilt from the store every day, as a fresh process would.
pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run the simulation over `history`
    ///
    /// # Arguments
    /// * `history` - Daily candles for one or more instruments (any order)
    pub async fn run(&self, history: &[Candle]) -> Result<SimulationReport> {
        let feed = Arc::new(ReplayFeed::new(history));
        let dates = feed.dates();
        let (Some(first), Some(last)) = (dates.first().copied(), dates.last().copied()) else {
            return Err(Error::Invalid("simulation needs at least one candle".to_string()));
        };
        let instruments = feed.instruments();

        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(PaperBroker::new(
            self.config.initial_cash,
            self.config.positions.commission_rate,
        ));

        let loader = CandleLoader::new(
            store.clone(),
            feed.clone(),
            self.config.bands,
            (last - first).num_days() + 1,
        );
        let processor = SignalProcessor::new(store.clone(), self.config.signal_lookback);
        let executor = TradeExecutor::new(
            store.clone(),
            broker.clone(),
            Notifications::disabled(),
            self.config.positions.clone(),
            self.config.execution_lookback,
        );

        tracing::info!(
            "🔬 Simulating {} instrument(s) over {} days ({} → {})",
            instruments.len(),
            dates.len(),
            first,
            last
        );

        let mut equity_curve = Vec::with_capacity(dates.len());
        for day in &dates {
            loader.load_all(&instruments, *day).await?;

            let mut ctx = processor.recover().await?;
            processor.run_cycle(&mut ctx, &instruments, *day).await?;

            for instrument in &instruments {
                if let Some(close) = feed.close_on(instrument, *day) {
                    broker.set_price(instrument, close);
                }
            }
            executor.run_cycle(&instruments).await?;

            equity_curve.push(broker.equity());
        }

        let trades = store.trade_history(None).await?;
        let metrics = SimulationMetrics::from_trades(trades, self.config.initial_cash, &equity_curve);

        tracing::info!(
            "🏁 Simulation complete: {} fills, realised profit {:.2}, final equity {:.2}",
            metrics.fills,
            metrics.realized_profit,
            metrics.final_equity
        );

        Ok(SimulationReport {
            days: dates.len(),
            signals: store.all_signals()?,
            metrics,
        })
    }
}
