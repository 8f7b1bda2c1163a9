use crate::models::IndicatorRow;
use chrono::NaiveDate;

/// Index of the most recent downward SMA crossing in the window
///
/// A crossing at `t` means `close[t] < sma[t]` and `close[t-1] >= sma[t-1]`.
pub fn find_trend_change(rows: &[IndicatorRow]) -> Option<usize> {
    (1..rows.len())
        .rev()
        .find(|&t| rows[t].close < rows[t].sma && rows[t - 1].close >= rows[t - 1].sma)
}

/// ATTENTION candidate: first close below the lower band at or after the
/// most recent downward crossing
pub fn find_attention(rows: &[IndicatorRow]) -> Option<&IndicatorRow> {
    let start = find_trend_change(rows)?;
    rows[start..].iter().find(|r| r.close < r.lower_band)
}

/// BUY candidate: first row after the ATTENTION date closing below the
/// ATTENTION close and not above its own SMA
pub fn find_buy(
    rows: &[IndicatorRow],
    attention_date: NaiveDate,
    attention_close: f64,
) -> Option<&IndicatorRow> {
    rows.iter()
        .find(|r| r.date > attention_date && r.close < attention_close && r.close <= r.sma)
}

pub fn should_accumulate(latest: &IndicatorRow, average_price: f64) -> bool {
    latest.close < average_price
}

pub fn should_sell(latest: &IndicatorRow) -> bool {
    latest.close > latest.sma
}
