#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::{Arc, Mutex};
use swingbot::execution::PositionManager;
use swingbot::indicators::{calculate_band_series, BandConfig};
use swingbot::notify::{Notifications, Notifier};
use swingbot::throttle::Throttle;
use swingbot::{Bands, Candle, CandleRecord};

pub const TICKER: &str = "SBER";

pub fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 4, 1).unwrap() + Duration::days(n)
}

pub fn instruments() -> Vec<String> {
    vec![TICKER.to_string()]
}

pub fn candle(date: NaiveDate, close: f64) -> Candle {
    Candle {
        instrument: TICKER.to_string(),
        date,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000,
    }
}

/// A stored row with explicit indicator values
pub fn row(n: i64, close: f64, sma: f64, lower: f64) -> CandleRecord {
    CandleRecord {
        candle: candle(day(n), close),
        bands: Some(Bands {
            sma,
            std: (sma - lower) / 2.0,
            upper: sma + (sma - lower),
            lower,
        }),
    }
}

/// Rows for consecutive days starting at `day(0)` with bands computed from the closes
pub fn rows_from_closes(closes: &[f64], config: &BandConfig) -> Vec<CandleRecord> {
    let bands = calculate_band_series(closes, config);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| CandleRecord {
            candle: candle(day(i as i64), close),
            bands: bands[i],
        })
        .collect()
}

pub fn position_manager(commission_rate: f64) -> PositionManager {
    PositionManager {
        commission_rate,
        max_operation_amount: 10_000.0,
        max_shares_per_trade: 100,
    }
}

/// Captures every operator message in order
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, text: &str) -> swingbot::Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

pub fn recording() -> (Arc<RecordingNotifier>, Notifications) {
    let recorder = Arc::new(RecordingNotifier::default());
    let notifications = Notifications::new(recorder.clone(), None, Throttle::disabled());
    (recorder, notifications)
}
