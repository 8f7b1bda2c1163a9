use crate::models::Candle;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Mean-reverting walk around the base price (±1.5% daily noise)
    Sideways,
    /// Upward drift (+0.3% daily average) with pullbacks
    Uptrend,
    /// Downward drift (-0.3% daily average)
    Downtrend,
    /// Large swings (±4% daily)
    Volatile,
}

impl std::str::FromStr for MarketScenario {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sideways" => Ok(Self::Sideways),
            "uptrend" => Ok(Self::Uptrend),
            "downtrend" => Ok(Self::Downtrend),
            "volatile" => Ok(Self::Volatile),
            other => Err(crate::Error::Invalid(format!("unknown scenario: {}", other))),
        }
    }
}

/// Generates reproducible daily candles for the simulator
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 250.0,
            base_volume: 1_000_000.0,
        }
    }

    /// Generate one candle per weekday
    ///
    /// # Arguments
    /// * `instrument` - Ticker written into every candle
    /// * `scenario` - The market scenario to simulate
    /// * `start` - First candidate date; weekends are skipped
    /// * `days` - Number of trading days to generate
    pub fn generate(
        &mut self,
        instrument: &str,
        scenario: MarketScenario,
        start: NaiveDate,
        days: usize,
    ) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(days);
        let mut price = self.base_price;
        let mut date = start;

        while candles.len() < days {
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                date += Duration::days(1);
                continue;
            }

            let change = match scenario {
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - price) / price * 0.1;
                    reversion + self.rng.gen_range(-0.015..0.015)
                }
                MarketScenario::Uptrend => 0.003 + self.rng.gen_range(-0.015..0.015),
                MarketScenario::Downtrend => -0.003 + self.rng.gen_range(-0.015..0.015),
                MarketScenario::Volatile => self.rng.gen_range(-0.04..0.04),
            };
            let previous = price;
            price = (price * (1.0 + change)).max(self.base_price * 0.2);

            candles.push(self.create_candle(instrument, date, previous, price));
            date += Duration::days(1);
        }

        candles
    }

    /// Build OHLC around an open at the previous close
    fn create_candle(&mut self, instrument: &str, date: NaiveDate, open: f64, close: f64) -> Candle {
        let wick = 0.005;
        let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..wick));
        let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..wick));
        let volume = (self.base_volume * self.rng.gen_range(0.7..1.3)) as i64;

        Candle {
            instrument: instrument.to_string(),
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}
