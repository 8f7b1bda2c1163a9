// Candle loading: fetch missing daily history, attach bands, store
use crate::api::MarketData;
use crate::db::SignalStore;
use crate::indicators::{calculate_band_series, BandConfig};
use crate::models::{Candle, CandleRecord};
use crate::{Error, Result};
use chrono::{Duration, NaiveDate};
use std::sync::Arc;

/// Outcome of a load run across instruments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// (instrument, newly stored rows)
    pub loaded: Vec<(String, usize)>,
    /// (instrument, reason)
    pub skipped: Vec<(String, String)>,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.loaded.iter().map(|(_, n)| n).sum()
    }
}

/// Brings each instrument's candle table up to date
pub struct CandleLoader {
    store: Arc<dyn SignalStore>,
    market: Arc<dyn MarketData>,
    bands: BandConfig,
    history_days: i64,
}

impl CandleLoader {
    /// # Arguments
    /// * `history_days` - How far back to fetch for an instrument with no stored rows
    pub fn new(
        store: Arc<dyn SignalStore>,
        market: Arc<dyn MarketData>,
        bands: BandConfig,
        history_days: i64,
    ) -> Self {
        Self {
            store,
            market,
            bands,
            history_days: history_days.max(1),
        }
    }

    /// Load every instrument. Unknown instruments are skipped; store failures abort.
    pub async fn load_all(&self, instruments: &[String], today: NaiveDate) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for instrument in instruments {
            match self.load_instrument(instrument, today).await {
                Ok(stored) => report.loaded.push((instrument.clone(), stored)),
                Err(e) if e.is_unrecoverable() => return Err(e),
                Err(Error::InstrumentNotFound(_)) => {
                    tracing::warn!("⚠️  {} not found at the provider, skipping", instrument);
                    report
                        .skipped
                        .push((instrument.clone(), "instrument not found".to_string()));
                }
                Err(e) => {
                    tracing::error!("❌ Failed to load {}: {}", instrument, e);
                    report.skipped.push((instrument.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            "📥 Load finished: {} new rows, {} instrument(s) skipped",
            report.total(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Fetch and store candles after the last stored date, through `today`
    pub async fn load_instrument(&self, instrument: &str, today: NaiveDate) -> Result<usize> {
        self.store.ensure_instrument(instrument).await?;

        let last = self.store.last_candle_date(instrument).await?;
        let from = match last {
            Some(date) => date + Duration::days(1),
            None => today - Duration::days(self.history_days),
        };
        if from > today {
            tracing::debug!("{} is up to date", instrument);
            return Ok(0);
        }

        let candles = self
            .market
            .fetch_daily_candles(instrument, from, today)
            .await?;
        let fresh: Vec<Candle> = candles
            .into_iter()
            .filter(|c| last.map_or(true, |d| c.date > d))
            .collect();

        let stored = self.store_candles(instrument, &fresh).await?;
        tracing::info!("📥 {}: {} new candle(s) since {}", instrument, stored, from);
        Ok(stored)
    }

    /// Attach bands to `candles` (ascending, all newer than stored rows) and insert them
    pub async fn store_candles(&self, instrument: &str, candles: &[Candle]) -> Result<usize> {
        let Some(first) = candles.first() else {
            return Ok(0);
        };

        let mut closes = self
            .store
            .closes_before(instrument, first.date, self.bands.window.saturating_sub(1))
            .await?;
        let offset = closes.len();
        closes.extend(candles.iter().map(|c| c.close));

        let series = calculate_band_series(&closes, &self.bands);
        let records: Vec<CandleRecord> = candles
            .iter()
            .enumerate()
            .map(|(i, candle)| CandleRecord {
                candle: candle.clone(),
                bands: series[offset + i],
            })
            .collect();

        self.store.insert_candles(instrument, &records).await
    }
}
