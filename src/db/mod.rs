// Signal log, candle history and position storage

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::models::{
    CandleRecord, IndicatorRow, NewSignal, Position, Signal, SignalKind, TradeLog,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Everything written for one confirmed fill, applied atomically
#[derive(Debug, Clone)]
pub struct FillRecord {
    /// Position state after the fill (closed positions have zero quantity)
    pub position: Position,
    pub trade: TradeLog,
    /// Signal consumed by this fill, if any
    pub signal_id: Option<i64>,
}

/// Durable store behind the signal state machine and the executor
///
/// Signal inserts are insert-or-ignore on `(instrument, kind, date, parent)`:
/// `insert_signal` returns `None` when the same logical signal is already
/// logged.
#[async_trait]
pub trait SignalStore: Send + Sync {
    // ---- candles ----

    /// Create the per-instrument candle table if missing
    async fn ensure_instrument(&self, instrument: &str) -> Result<()>;

    async fn last_candle_date(&self, instrument: &str) -> Result<Option<NaiveDate>>;

    /// Up to `limit` closes dated strictly before `date`, ascending
    async fn closes_before(&self, instrument: &str, date: NaiveDate, limit: usize)
        -> Result<Vec<f64>>;

    /// Insert candles, ignoring dates already stored. Returns the number inserted.
    async fn insert_candles(&self, instrument: &str, records: &[CandleRecord]) -> Result<usize>;

    /// Most recent `limit` rows with defined bands dated at or before `as_of`, ascending
    async fn recent_rows(
        &self,
        instrument: &str,
        as_of: NaiveDate,
        limit: usize,
    ) -> Result<Vec<IndicatorRow>>;

    /// Row with defined bands on exactly `date`
    async fn row_on(&self, instrument: &str, date: NaiveDate) -> Result<Option<IndicatorRow>>;

    // ---- signals ----

    async fn insert_signal(&self, signal: &NewSignal) -> Result<Option<Signal>>;

    async fn has_active_attention(&self, instrument: &str, date: NaiveDate) -> Result<bool>;

    /// BUY whose parent is the given ATTENTION id
    async fn buy_for_parent(&self, parent_id: i64) -> Result<Option<Signal>>;

    async fn has_signal_on(&self, instrument: &str, kind: SignalKind, date: NaiveDate)
        -> Result<bool>;

    /// All active ATTENTION signals, ordered by instrument then date
    async fn active_attentions(&self) -> Result<Vec<Signal>>;

    /// Most recent active signal of `kind` for the instrument
    async fn latest_active(&self, instrument: &str, kind: SignalKind) -> Result<Option<Signal>>;

    /// Deactivate every active ATTENTION/BUY/ACCUMULATE of the instrument
    async fn deactivate_lineage(&self, instrument: &str) -> Result<u64>;

    /// Executable signals not yet consumed, dated at or after `since`, in id order.
    ///
    /// BUY/ACCUMULATE must still be active; SELL is never deactivated.
    async fn pending_executions(&self, instrument: &str, since: NaiveDate) -> Result<Vec<Signal>>;

    /// Active signals the operator has not been notified about, in id order
    async fn unsent_signals(&self) -> Result<Vec<Signal>>;

    async fn mark_sent(&self, signal_id: i64) -> Result<()>;

    // ---- positions ----

    async fn position(&self, instrument: &str) -> Result<Option<Position>>;

    async fn open_positions(&self) -> Result<Vec<Position>>;

    /// Upsert the position, append the trade and mark the signal executed
    async fn record_fill(&self, fill: &FillRecord) -> Result<()>;

    /// Reset positions that violate `in_market => quantity > 0` or hold a
    /// stale average with zero quantity. Returns the number repaired.
    async fn repair_positions(&self) -> Result<u64>;

    async fn trade_history(&self, instrument: Option<&str>) -> Result<Vec<TradeLog>>;
}

/// Table name for an instrument's candle history
///
/// Only ASCII alphanumerics and `_` are accepted, since the name is
/// interpolated into SQL.
pub fn candle_table(instrument: &str) -> Result<String> {
    if instrument.is_empty()
        || !instrument
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Invalid(format!(
            "instrument '{}' is not a valid ticker",
            instrument
        )));
    }
    Ok(format!("candles_{}", instrument.to_ascii_lowercase()))
}
