use crate::db::FillRecord;
use crate::execution::{Balance, ClosedPosition, ExecutionOutcome, ExecutionReport};
use crate::models::{Signal, SignalKind, TradeKind};
use crate::strategy::CycleSummary;
use chrono::NaiveDate;
use std::fmt::Write;

fn signal_icon(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Attention => "👀",
        SignalKind::Buy => "🟢",
        SignalKind::Accumulate => "➕",
        SignalKind::Sell => "🔴",
    }
}

pub fn signal(signal: &Signal, close: Option<f64>) -> String {
    let mut text = format!(
        "{} {} {}\nDate: {}",
        signal_icon(signal.kind),
        signal.kind,
        signal.instrument,
        signal.date
    );
    if let Some(close) = close {
        let _ = write!(text, "\nClose: {:.2}", close);
    }
    text
}

pub fn cycle_summary(summary: &CycleSummary, as_of: NaiveDate) -> String {
    let grouped = summary.by_kind();
    if grouped.is_empty() {
        return format!("📭 No signals today ({})", as_of);
    }

    let mut text = format!("📊 Signals for {}", as_of);
    for (kind, instruments) in grouped {
        let _ = write!(text, "\n{} {}: {}", signal_icon(kind), kind, instruments.join(", "));
    }
    if !summary.skipped.is_empty() {
        let names: Vec<&str> = summary.skipped.iter().map(|(i, _)| i.as_str()).collect();
        let _ = write!(text, "\n⚠️ Skipped: {}", names.join(", "));
    }
    text
}

pub fn fill(instrument: &str, record: &FillRecord) -> String {
    let trade = &record.trade;
    let mut text = format!(
        "💹 {} {}\nQuantity: {}\nPrice: {:.2}\nAmount: {:.2}",
        trade.kind.as_str(),
        instrument,
        trade.quantity,
        trade.price,
        trade.amount
    );
    match trade.kind {
        TradeKind::Sell => {
            let _ = write!(text, "\nProfit: {:.2}", trade.profit.unwrap_or_default());
        }
        TradeKind::Buy | TradeKind::Accumulate => {
            if let Some(avg) = record.position.average_price {
                let _ = write!(
                    text,
                    "\nPosition: {} @ {:.2}",
                    record.position.quantity, avg
                );
            }
        }
    }
    text
}

pub fn insufficient_cash(instrument: &str, reason: &str) -> String {
    format!("💸 {} skipped: {}", instrument, reason)
}

pub fn order_failed(instrument: &str, error: &str) -> String {
    format!("❌ {} order failed: {}", instrument, error)
}

pub fn cycle_aborted(stage: &str, error: &str) -> String {
    format!("🛑 {} cycle aborted: {}", stage, error)
}

pub fn execution_finished(report: &ExecutionReport) -> String {
    let mut text = format!("✅ Trading cycle finished: {} trade(s)", report.trades());
    if let Some(balance) = report.starting_balance {
        let _ = write!(
            text,
            "\nStarting balance: cash {:.2}, shares {:.2}, total {:.2}",
            balance.cash,
            balance.shares,
            balance.total()
        );
    }
    for (instrument, outcome) in &report.outcomes {
        match outcome {
            ExecutionOutcome::Executed { kind, fill, profit } => {
                let _ = write!(
                    text,
                    "\n{} {} x{} @ {:.2}",
                    kind.as_str(),
                    instrument,
                    fill.quantity,
                    fill.price
                );
                if let Some(profit) = profit {
                    let _ = write!(text, " (profit {:.2})", profit);
                }
            }
            ExecutionOutcome::Failed { error } => {
                let _ = write!(text, "\n❌ {}: {}", instrument, error);
            }
            ExecutionOutcome::Skipped { .. } => {}
        }
    }
    if report.repaired > 0 {
        let _ = write!(text, "\n🔧 Repaired positions: {}", report.repaired);
    }
    text
}

pub fn liquidation(closed: &[ClosedPosition]) -> String {
    if closed.is_empty() {
        return "📭 No open positions to close".to_string();
    }

    let mut text = String::from("🔻 Closed all positions");
    let mut total = 0.0;
    for entry in closed {
        total += entry.profit;
        let _ = write!(
            text,
            "\n{} x{}: {:.2} → {:.2} ({:+.2}%), {} day(s), profit {:.2}",
            entry.instrument,
            entry.quantity,
            entry.entry_price,
            entry.exit_price,
            entry.return_pct,
            entry.days_held,
            entry.profit
        );
    }
    let _ = write!(text, "\nTotal profit: {:.2}", total);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_signal_message() {
        let s = Signal {
            id: 1,
            instrument: "SBER".to_string(),
            kind: SignalKind::Buy,
            date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            is_active: true,
            parent_id: Some(0),
            created_at: Utc::now(),
        };
        let text = signal(&s, Some(251.3));
        assert!(text.contains("BUY SBER"));
        assert!(text.contains("2025-02-03"));
        assert!(text.contains("251.30"));
    }

    #[test]
    fn test_empty_summary() {
        let as_of = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        let text = cycle_summary(&CycleSummary::default(), as_of);
        assert!(text.contains("No signals today"));
    }

    #[test]
    fn test_execution_finished_shows_balance() {
        let report = ExecutionReport {
            starting_balance: Some(Balance {
                cash: 1_000.0,
                shares: 250.5,
            }),
            ..ExecutionReport::default()
        };
        let text = execution_finished(&report);
        assert!(text.contains("cash 1000.00, shares 250.50, total 1250.50"));
    }

    #[test]
    fn test_liquidation_report_totals() {
        let closed = vec![
            ClosedPosition {
                instrument: "SBER".to_string(),
                quantity: 10,
                entry_price: 100.0,
                exit_price: 110.0,
                profit: 100.0,
                return_pct: 10.0,
                days_held: 4,
            },
            ClosedPosition {
                instrument: "GAZP".to_string(),
                quantity: 5,
                entry_price: 200.0,
                exit_price: 190.0,
                profit: -50.0,
                return_pct: -5.0,
                days_held: 1,
            },
        ];
        let text = liquidation(&closed);
        assert!(text.contains("+10.00%"));
        assert!(text.contains("-5.00%"));
        assert!(text.contains("Total profit: 50.00"));
    }
}
