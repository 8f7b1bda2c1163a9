use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// One trading day of an instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub instrument: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// SMA and volatility band values for a single row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bands {
    pub sma: f64,
    pub std: f64,
    pub upper: f64,
    pub lower: f64,
}

/// A candle as it is persisted: bands are absent until the window has filled
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRecord {
    pub candle: Candle,
    pub bands: Option<Bands>,
}

/// A stored candle with defined indicator values.
///
/// Only rows with a full window are ever materialised as `IndicatorRow`,
/// so the signal scan cannot see an undefined band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub sma: f64,
    pub upper_band: f64,
    pub lower_band: f64,
}

impl IndicatorRow {
    pub fn from_record(record: &CandleRecord) -> Option<Self> {
        let bands = record.bands?;
        let c = &record.candle;
        Some(Self {
            date: c.date,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            sma: bands.sma,
            upper_band: bands.upper,
            lower_band: bands.lower,
        })
    }
}

/// The four lifecycle signals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKind {
    Attention,
    Buy,
    Accumulate,
    Sell,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Attention,
        SignalKind::Buy,
        SignalKind::Accumulate,
        SignalKind::Sell,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Attention => "ATTENTION",
            SignalKind::Buy => "BUY",
            SignalKind::Accumulate => "ACCUMULATE",
            SignalKind::Sell => "SELL",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATTENTION" => Ok(SignalKind::Attention),
            "BUY" => Ok(SignalKind::Buy),
            "ACCUMULATE" => Ok(SignalKind::Accumulate),
            "SELL" => Ok(SignalKind::Sell),
            other => Err(Error::Invalid(format!("unknown signal kind: {}", other))),
        }
    }
}

/// A persisted signal log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub id: i64,
    pub instrument: String,
    pub kind: SignalKind,
    pub date: NaiveDate,
    pub is_active: bool,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A signal about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub instrument: String,
    pub kind: SignalKind,
    pub date: NaiveDate,
    pub parent_id: Option<i64>,
}

impl NewSignal {
    pub fn new(instrument: &str, kind: SignalKind, date: NaiveDate, parent_id: Option<i64>) -> Self {
        Self {
            instrument: instrument.to_string(),
            kind,
            date,
            parent_id,
        }
    }
}

/// Held position in an instrument (one row per instrument)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub instrument: String,
    pub average_price: Option<f64>,
    pub quantity: i64,
    pub in_market: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.in_market && self.quantity > 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Trade log category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeKind {
    Buy,
    Accumulate,
    Sell,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "BUY",
            TradeKind::Accumulate => "ACCUMULATE",
            TradeKind::Sell => "SELL",
        }
    }

    pub fn side(&self) -> OrderSide {
        match self {
            TradeKind::Buy | TradeKind::Accumulate => OrderSide::Buy,
            TradeKind::Sell => OrderSide::Sell,
        }
    }
}

impl FromStr for TradeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(TradeKind::Buy),
            "ACCUMULATE" => Ok(TradeKind::Accumulate),
            "SELL" => Ok(TradeKind::Sell),
            other => Err(Error::Invalid(format!("unknown trade type: {}", other))),
        }
    }
}

/// A confirmed fill as recorded in `trade_logs`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeLog {
    pub instrument: String,
    pub kind: TradeKind,
    pub price: f64,
    pub quantity: i64,
    pub amount: f64,
    pub profit: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Broker confirmation of a market order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub quantity: i64,
}
