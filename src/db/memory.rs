use super::{FillRecord, SignalStore};
use crate::models::{
    CandleRecord, IndicatorRow, NewSignal, Position, Signal, SignalKind, TradeLog,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    candles: HashMap<String, BTreeMap<NaiveDate, CandleRecord>>,
    signals: Vec<Signal>,
    next_signal_id: i64,
    executed: HashSet<i64>,
    sent: HashSet<i64>,
    positions: HashMap<String, Position>,
    trades: Vec<TradeLog>,
}

/// In-process store with the same contract as [`super::PostgresStore`]
///
/// Backs the simulator and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database pool were gone
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overwrite a position directly (repair and recovery tests)
    pub fn put_position(&self, position: Position) -> Result<()> {
        let mut inner = self.lock()?;
        inner.positions.insert(position.instrument.clone(), position);
        Ok(())
    }

    pub fn all_signals(&self) -> Result<Vec<Signal>> {
        Ok(self.lock()?.signals.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolClosed));
        }
        self.inner
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

fn same_parent(a: Option<i64>, b: Option<i64>) -> bool {
    a.unwrap_or(0) == b.unwrap_or(0)
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn ensure_instrument(&self, instrument: &str) -> Result<()> {
        super::candle_table(instrument)?;
        self.lock()?.candles.entry(instrument.to_string()).or_default();
        Ok(())
    }

    async fn last_candle_date(&self, instrument: &str) -> Result<Option<NaiveDate>> {
        let inner = self.lock()?;
        Ok(inner
            .candles
            .get(instrument)
            .and_then(|rows| rows.keys().next_back().copied()))
    }

    async fn closes_before(
        &self,
        instrument: &str,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<f64>> {
        let inner = self.lock()?;
        let Some(rows) = inner.candles.get(instrument) else {
            return Ok(Vec::new());
        };
        let mut closes: Vec<f64> = rows
            .range(..date)
            .rev()
            .take(limit)
            .map(|(_, r)| r.candle.close)
            .collect();
        closes.reverse();
        Ok(closes)
    }

    async fn insert_candles(&self, instrument: &str, records: &[CandleRecord]) -> Result<usize> {
        let mut inner = self.lock()?;
        let rows = inner.candles.entry(instrument.to_string()).or_default();
        let mut inserted = 0;
        for record in records {
            if !rows.contains_key(&record.candle.date) {
                rows.insert(record.candle.date, record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn recent_rows(
        &self,
        instrument: &str,
        as_of: NaiveDate,
        limit: usize,
    ) -> Result<Vec<IndicatorRow>> {
        let inner = self.lock()?;
        let Some(rows) = inner.candles.get(instrument) else {
            return Ok(Vec::new());
        };
        let mut recent: Vec<IndicatorRow> = rows
            .range(..=as_of)
            .rev()
            .filter_map(|(_, r)| IndicatorRow::from_record(r))
            .take(limit)
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn row_on(&self, instrument: &str, date: NaiveDate) -> Result<Option<IndicatorRow>> {
        let inner = self.lock()?;
        Ok(inner
            .candles
            .get(instrument)
            .and_then(|rows| rows.get(&date))
            .and_then(IndicatorRow::from_record))
    }

    async fn insert_signal(&self, signal: &NewSignal) -> Result<Option<Signal>> {
        let mut inner = self.lock()?;
        let duplicate = inner.signals.iter().any(|s| {
            s.instrument == signal.instrument
                && s.kind == signal.kind
                && s.date == signal.date
                && same_parent(s.parent_id, signal.parent_id)
        });
        if duplicate {
            return Ok(None);
        }

        inner.next_signal_id += 1;
        let stored = Signal {
            id: inner.next_signal_id,
            instrument: signal.instrument.clone(),
            kind: signal.kind,
            date: signal.date,
            is_active: true,
            parent_id: signal.parent_id,
            created_at: Utc::now(),
        };
        inner.signals.push(stored.clone());
        Ok(Some(stored))
    }

    async fn has_active_attention(&self, instrument: &str, date: NaiveDate) -> Result<bool> {
        let inner = self.lock()?;
        Ok(inner.signals.iter().any(|s| {
            s.instrument == instrument
                && s.kind == SignalKind::Attention
                && s.date == date
                && s.is_active
        }))
    }

    async fn buy_for_parent(&self, parent_id: i64) -> Result<Option<Signal>> {
        let inner = self.lock()?;
        Ok(inner
            .signals
            .iter()
            .find(|s| s.kind == SignalKind::Buy && s.parent_id == Some(parent_id))
            .cloned())
    }

    async fn has_signal_on(
        &self,
        instrument: &str,
        kind: SignalKind,
        date: NaiveDate,
    ) -> Result<bool> {
        let inner = self.lock()?;
        Ok(inner
            .signals
            .iter()
            .any(|s| s.instrument == instrument && s.kind == kind && s.date == date))
    }

    async fn active_attentions(&self) -> Result<Vec<Signal>> {
        let inner = self.lock()?;
        let mut found: Vec<Signal> = inner
            .signals
            .iter()
            .filter(|s| s.kind == SignalKind::Attention && s.is_active)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.instrument
                .cmp(&b.instrument)
                .then(a.date.cmp(&b.date))
                .then(a.id.cmp(&b.id))
        });
        Ok(found)
    }

    async fn latest_active(&self, instrument: &str, kind: SignalKind) -> Result<Option<Signal>> {
        let inner = self.lock()?;
        Ok(inner
            .signals
            .iter()
            .filter(|s| s.instrument == instrument && s.kind == kind && s.is_active)
            .max_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn deactivate_lineage(&self, instrument: &str) -> Result<u64> {
        let mut inner = self.lock()?;
        let mut count = 0;
        for signal in inner.signals.iter_mut() {
            if signal.instrument == instrument && signal.is_active && signal.kind != SignalKind::Sell
            {
                signal.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn pending_executions(&self, instrument: &str, since: NaiveDate) -> Result<Vec<Signal>> {
        let inner = self.lock()?;
        Ok(inner
            .signals
            .iter()
            .filter(|s| {
                s.instrument == instrument
                    && s.date >= since
                    && !inner.executed.contains(&s.id)
                    && match s.kind {
                        SignalKind::Buy | SignalKind::Accumulate => s.is_active,
                        SignalKind::Sell => true,
                        SignalKind::Attention => false,
                    }
            })
            .cloned()
            .collect())
    }

    async fn unsent_signals(&self) -> Result<Vec<Signal>> {
        let inner = self.lock()?;
        Ok(inner
            .signals
            .iter()
            .filter(|s| s.is_active && !inner.sent.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, signal_id: i64) -> Result<()> {
        self.lock()?.sent.insert(signal_id);
        Ok(())
    }

    async fn position(&self, instrument: &str) -> Result<Option<Position>> {
        Ok(self.lock()?.positions.get(instrument).cloned())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let inner = self.lock()?;
        let mut open: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| p.in_market)
            .cloned()
            .collect();
        open.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        Ok(open)
    }

    async fn record_fill(&self, fill: &FillRecord) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(id) = fill.signal_id {
            if !inner.executed.insert(id) {
                return Err(Error::Store(format!("signal {} already executed", id)));
            }
        }

        let mut position = fill.position.clone();
        if let Some(existing) = inner.positions.get(&position.instrument) {
            position.created_at = existing.created_at;
            position.updated_at = Some(Utc::now());
        }
        inner.positions.insert(position.instrument.clone(), position);
        inner.trades.push(fill.trade.clone());
        Ok(())
    }

    async fn repair_positions(&self) -> Result<u64> {
        let mut inner = self.lock()?;
        let mut repaired = 0;
        for position in inner.positions.values_mut() {
            let broken_open = position.in_market && position.quantity <= 0;
            let stale_average = position.average_price.is_some() && position.quantity == 0;
            if broken_open || stale_average {
                position.in_market = false;
                position.quantity = 0;
                position.average_price = None;
                position.updated_at = Some(Utc::now());
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    async fn trade_history(&self, instrument: Option<&str>) -> Result<Vec<TradeLog>> {
        let inner = self.lock()?;
        Ok(inner
            .trades
            .iter()
            .filter(|t| instrument.map_or(true, |i| t.instrument == i))
            .cloned()
            .collect())
    }
}
