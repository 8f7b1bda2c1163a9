use super::signals::{find_attention, find_buy, should_accumulate, should_sell};
use super::state::{SignalState, Transition};
use crate::db::SignalStore;
use crate::models::{NewSignal, Position, Signal, SignalKind};
use crate::{Error, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Per-run view of every instrument's lifecycle state
///
/// Rebuilt from the signal log at the start of each run and never persisted.
#[derive(Debug, Clone, Default)]
pub struct SignalContext {
    states: HashMap<String, SignalState>,
}

impl SignalContext {
    pub fn state(&self, instrument: &str) -> SignalState {
        self.states.get(instrument).copied().unwrap_or_default()
    }

    pub fn set(&mut self, instrument: &str, state: SignalState) {
        if state == SignalState::None {
            self.states.remove(instrument);
        } else {
            self.states.insert(instrument.to_string(), state);
        }
    }

    /// Number of instruments in a non-NONE state
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Outcome of one signal cycle
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub processed: usize,
    pub emitted: Vec<Signal>,
    /// Instruments skipped this cycle with the reason
    pub skipped: Vec<(String, String)>,
}

impl CycleSummary {
    /// Instruments that received each signal kind, in emission order
    pub fn by_kind(&self) -> BTreeMap<SignalKind, Vec<String>> {
        let mut grouped: BTreeMap<SignalKind, Vec<String>> = BTreeMap::new();
        for signal in &self.emitted {
            let names = grouped.entry(signal.kind).or_default();
            if !names.contains(&signal.instrument) {
                names.push(signal.instrument.clone());
            }
        }
        grouped
    }

    pub fn count(&self, kind: SignalKind) -> usize {
        self.emitted.iter().filter(|s| s.kind == kind).count()
    }
}

/// Drives the ATTENTION -> BUY -> ACCUMULATE* -> SELL lifecycle
pub struct SignalProcessor {
    store: Arc<dyn SignalStore>,
    lookback: usize,
}

impl SignalProcessor {
    /// # Arguments
    /// * `store` - Signal log and candle history
    /// * `lookback` - Number of most recent indicator rows scanned per instrument
    pub fn new(store: Arc<dyn SignalStore>, lookback: usize) -> Self {
        Self { store, lookback }
    }

    /// Rebuild the context from the durable log
    ///
    /// Active ATTENTIONs (latest per instrument) are seeded with the close
    /// re-read from their own row. An ATTENTION whose BUY already fired is
    /// spent. Open positions are IN_MARKET.
    pub async fn recover(&self) -> Result<SignalContext> {
        let mut ctx = SignalContext::default();

        let mut latest: BTreeMap<String, Signal> = BTreeMap::new();
        for attention in self.store.active_attentions().await? {
            latest.insert(attention.instrument.clone(), attention);
        }

        for (instrument, attention) in &latest {
            if self.store.buy_for_parent(attention.id).await?.is_some() {
                continue;
            }
            match self.store.row_on(instrument, attention.date).await? {
                Some(row) => ctx.set(
                    instrument,
                    SignalState::Attention {
                        signal_id: attention.id,
                        date: attention.date,
                        close: row.close,
                    },
                ),
                None => tracing::warn!(
                    "⚠️  {}: no stored row for ATTENTION {} on {}, not restored",
                    instrument,
                    attention.id,
                    attention.date
                ),
            }
        }

        for position in self.store.open_positions().await? {
            if !position.is_open() {
                continue;
            }
            let lineage = self.lineage_of_position(&position.instrument).await?;
            ctx.set(&position.instrument, SignalState::InMarket { lineage });
        }

        tracing::info!("♻️  Recovered signal context: {} active instruments", ctx.len());
        Ok(ctx)
    }

    /// Evaluate every instrument once for `as_of`
    ///
    /// Only store connectivity loss aborts the cycle; any other failure skips
    /// the instrument.
    pub async fn run_cycle(
        &self,
        ctx: &mut SignalContext,
        instruments: &[String],
        as_of: NaiveDate,
    ) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();

        for instrument in instruments {
            match self.process_instrument(ctx, instrument, as_of).await {
                Ok(mut signals) => {
                    summary.processed += 1;
                    summary.emitted.append(&mut signals);
                }
                Err(e) if e.is_unrecoverable() => {
                    tracing::error!("❌ Signal cycle aborted at {}: {}", instrument, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("⚠️  Skipping {}: {}", instrument, e);
                    summary.skipped.push((instrument.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            "📈 Signal cycle {}: {} processed, {} signals, {} skipped",
            as_of,
            summary.processed,
            summary.emitted.len(),
            summary.skipped.len()
        );
        Ok(summary)
    }

    /// Run the four stages for one instrument in fixed order
    pub async fn process_instrument(
        &self,
        ctx: &mut SignalContext,
        instrument: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<Signal>> {
        let rows = self.store.recent_rows(instrument, as_of, self.lookback).await?;
        let Some(latest) = rows.last() else {
            return Err(Error::insufficient_data(instrument, "no indicator rows"));
        };
        if rows.len() < 2 {
            return Err(Error::insufficient_data(
                instrument,
                format!("{} indicator row(s)", rows.len()),
            ));
        }

        let mut state = ctx.state(instrument);
        let mut emitted = Vec::new();

        let position = self
            .store
            .position(instrument)
            .await?
            .filter(Position::is_open);

        if position.is_some() && !state.is_in_market() {
            let lineage = self.lineage_of_position(instrument).await?;
            tracing::debug!("{}: open position, treating as IN_MARKET", instrument);
            state = SignalState::InMarket { lineage };
        }

        // 1. ATTENTION
        if !state.is_in_market() {
            if let Some(candidate) = find_attention(&rows) {
                if self
                    .store
                    .has_active_attention(instrument, candidate.date)
                    .await?
                {
                    tracing::debug!("{}: ATTENTION on {} already logged", instrument, candidate.date);
                } else if let Some(signal) = self
                    .store
                    .insert_signal(&NewSignal::new(
                        instrument,
                        SignalKind::Attention,
                        candidate.date,
                        None,
                    ))
                    .await?
                {
                    tracing::info!(
                        "👀 {} ATTENTION on {} (close {:.2} < lower {:.2})",
                        instrument,
                        candidate.date,
                        candidate.close,
                        candidate.lower_band
                    );
                    state = state.apply(Transition::Attention {
                        signal_id: signal.id,
                        date: candidate.date,
                        close: candidate.close,
                    })?;
                    emitted.push(signal);
                } else {
                    tracing::debug!("{}: ATTENTION on {} already handled", instrument, candidate.date);
                }
            }
        }

        // 2. BUY
        if let SignalState::Attention {
            signal_id,
            date,
            close,
        } = state
        {
            if let Some(candidate) = find_buy(&rows, date, close) {
                let transition = Transition::Buy {
                    parent_id: Some(signal_id),
                };
                if self.store.buy_for_parent(signal_id).await?.is_some() {
                    tracing::debug!("{}: BUY for ATTENTION {} already logged", instrument, signal_id);
                    state = state.apply(transition)?;
                } else if let Some(signal) = self
                    .store
                    .insert_signal(&NewSignal::new(
                        instrument,
                        SignalKind::Buy,
                        candidate.date,
                        Some(signal_id),
                    ))
                    .await?
                {
                    tracing::info!(
                        "🟢 {} BUY on {} (close {:.2} < attention {:.2}, sma {:.2})",
                        instrument,
                        candidate.date,
                        candidate.close,
                        close,
                        candidate.sma
                    );
                    state = state.apply(transition)?;
                    emitted.push(signal);
                }
            }
        }

        // 3./4. ACCUMULATE and SELL need a filled position. SELL is checked first:
        // a close above the SMA ends the lineage, so adding to it that day is moot.
        if let Some(position) = &position {
            let lineage = state.lineage();

            if should_sell(latest) {
                if let Some(signal) = self
                    .emit_once(instrument, SignalKind::Sell, latest.date, lineage)
                    .await?
                {
                    let deactivated = self.store.deactivate_lineage(instrument).await?;
                    tracing::info!(
                        "🔴 {} SELL on {} (close {:.2} > sma {:.2}), {} signals deactivated",
                        instrument,
                        latest.date,
                        latest.close,
                        latest.sma,
                        deactivated
                    );
                    state = state.apply(Transition::Sell)?;
                    emitted.push(signal);
                }
            } else if let Some(average) = position.average_price {
                if should_accumulate(latest, average) {
                    if let Some(signal) = self
                        .emit_once(instrument, SignalKind::Accumulate, latest.date, lineage)
                        .await?
                    {
                        tracing::info!(
                            "➕ {} ACCUMULATE on {} (close {:.2} < average {:.2})",
                            instrument,
                            latest.date,
                            latest.close,
                            average
                        );
                        state = state.apply(Transition::Accumulate)?;
                        emitted.push(signal);
                    }
                }
            }
        }

        ctx.set(instrument, state);
        Ok(emitted)
    }

    /// Insert a signal unless one of the same kind is already logged for that day
    async fn emit_once(
        &self,
        instrument: &str,
        kind: SignalKind,
        date: NaiveDate,
        parent_id: Option<i64>,
    ) -> Result<Option<Signal>> {
        if self.store.has_signal_on(instrument, kind, date).await? {
            tracing::debug!("{}: {} on {} already logged", instrument, kind, date);
            return Ok(None);
        }
        self.store
            .insert_signal(&NewSignal::new(instrument, kind, date, parent_id))
            .await
    }

    async fn lineage_of_position(&self, instrument: &str) -> Result<Option<i64>> {
        Ok(self
            .store
            .latest_active(instrument, SignalKind::Buy)
            .await?
            .and_then(|buy| buy.parent_id))
    }
}
