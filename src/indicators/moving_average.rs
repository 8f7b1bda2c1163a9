/// Calculate Simple Moving Average (SMA) of the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Sample standard deviation (n - 1 denominator) of the last `period` values
///
/// Matches the rolling `std()` convention of common dataframe libraries, so
/// bands computed here agree with externally computed history.
pub fn calculate_sample_std(prices: &[f64], period: usize) -> Option<f64> {
    if period < 2 || prices.len() < period {
        return None;
    }

    let mean = calculate_sma(prices, period)?;
    let sum_sq: f64 = prices
        .iter()
        .rev()
        .take(period)
        .map(|p| (p - mean).powi(2))
        .sum();

    Some((sum_sq / (period - 1) as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_uses_trailing_window() {
        let prices = vec![1.0, 100.0, 102.0];
        assert_eq!(calculate_sma(&prices, 2), Some(101.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.is_none());
    }

    #[test]
    fn test_sample_std() {
        // mean 5, squared deviations sum to 32, n - 1 = 7
        let prices = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = calculate_sample_std(&prices, 8).unwrap();
        assert!((std - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sample_std_flat_series_is_zero() {
        let prices = vec![50.0; 10];
        assert_eq!(calculate_sample_std(&prices, 10), Some(0.0));
    }

    #[test]
    fn test_sample_std_needs_two_points() {
        assert!(calculate_sample_std(&[1.0, 2.0], 1).is_none());
    }
}
