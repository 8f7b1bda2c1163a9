use super::moving_average::{calculate_sample_std, calculate_sma};
use crate::models::Bands;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Volatility band configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BandConfig {
    pub window: usize,
    pub num_std: f64,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            window: 20,
            num_std: 2.0,
        }
    }
}

impl BandConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window < 2 {
            return Err(Error::Invalid(format!(
                "band window must be at least 2, got {}",
                self.window
            )));
        }
        if !(self.num_std > 0.0) || !self.num_std.is_finite() {
            return Err(Error::Invalid(format!(
                "band multiplier must be positive, got {}",
                self.num_std
            )));
        }
        Ok(())
    }
}

/// Bands for the window ending at the last close, if the window is full
pub fn calculate_bands(closes: &[f64], config: &BandConfig) -> Option<Bands> {
    let sma = calculate_sma(closes, config.window)?;
    let std = calculate_sample_std(closes, config.window)?;

    Some(Bands {
        sma,
        std,
        upper: sma + config.num_std * std,
        lower: sma - config.num_std * std,
    })
}

/// Bands for every position of a close series
///
/// Position `i` is `None` for `i < window - 1`.
pub fn calculate_band_series(closes: &[f64], config: &BandConfig) -> Vec<Option<Bands>> {
    (0..closes.len())
        .map(|i| calculate_bands(&closes[..=i], config))
        .collect()
}
