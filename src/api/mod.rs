// External market-data and broker adapters
pub mod paper;
pub mod tinkoff;

pub use paper::PaperBroker;
pub use tinkoff::TinkoffClient;

use crate::models::{Candle, Fill, OrderSide};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Source of daily candles
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Completed daily candles with `from <= date <= to`, ascending.
    ///
    /// Returns [`crate::Error::InstrumentNotFound`] for unknown tickers.
    async fn fetch_daily_candles(
        &self,
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>>;
}

/// Order placement and account queries
#[async_trait]
pub trait Broker: Send + Sync {
    /// Place a market order for `quantity` shares and wait for the fill
    async fn place_market_order(
        &self,
        instrument: &str,
        quantity: i64,
        side: OrderSide,
    ) -> Result<Fill>;

    async fn get_cash_balance(&self) -> Result<f64>;

    async fn get_last_price(&self, instrument: &str) -> Result<f64>;
}
