// Technical indicators module
// SMA and sample-std volatility bands

pub mod bollinger;
pub mod moving_average;

pub use bollinger::{calculate_band_series, calculate_bands, BandConfig};
pub use moving_average::{calculate_sample_std, calculate_sma};
