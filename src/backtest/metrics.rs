use crate::models::{TradeKind, TradeLog};
use serde::{Deserialize, Serialize};

/// Simulation performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationMetrics {
    // P&L
    pub realized_profit: f64,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,

    // Trade statistics
    pub fills: usize,
    pub buys: usize,
    pub accumulations: usize,
    /// Completed round trips (one per SELL)
    pub round_trips: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub largest_win: f64,
    pub largest_loss: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    pub trades: Vec<TradeLog>,
}

impl SimulationMetrics {
    /// # Arguments
    /// * `trades` - Every fill of the run, in order
    /// * `equity_curve` - Marked-to-market equity at the end of each simulated day
    pub fn from_trades(trades: Vec<TradeLog>, initial_equity: f64, equity_curve: &[f64]) -> Self {
        let final_equity = equity_curve.last().copied().unwrap_or(initial_equity);
        let count = |kind: TradeKind| trades.iter().filter(|t| t.kind == kind).count();

        let profits: Vec<f64> = trades
            .iter()
            .filter(|t| t.kind == TradeKind::Sell)
            .filter_map(|t| t.profit)
            .collect();
        let winning_trades = profits.iter().filter(|p| **p > 0.0).count();
        let round_trips = profits.len();
        let win_rate = if round_trips > 0 {
            winning_trades as f64 / round_trips as f64 * 100.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = Self::calculate_drawdown(initial_equity, equity_curve);

        Self {
            realized_profit: profits.iter().sum(),
            initial_equity,
            final_equity,
            total_return_pct: if initial_equity > 0.0 {
                (final_equity - initial_equity) / initial_equity * 100.0
            } else {
                0.0
            },
            fills: trades.len(),
            buys: count(TradeKind::Buy),
            accumulations: count(TradeKind::Accumulate),
            round_trips,
            winning_trades,
            losing_trades: round_trips - winning_trades,
            win_rate,
            largest_win: profits.iter().copied().filter(|p| *p > 0.0).fold(0.0, f64::max),
            largest_loss: profits.iter().copied().filter(|p| *p <= 0.0).fold(0.0, f64::min),
            max_drawdown,
            max_drawdown_pct,
            trades,
        }
    }

    /// Largest peak-to-trough fall of the equity curve
    fn calculate_drawdown(initial: f64, equity_curve: &[f64]) -> (f64, f64) {
        let mut peak = initial;
        let mut max_dd = 0.0;
        let mut max_dd_pct = 0.0;

        for &equity in equity_curve {
            if equity > peak {
                peak = equity;
            }
            let drawdown = peak - equity;
            if drawdown > max_dd {
                max_dd = drawdown;
                max_dd_pct = if peak > 0.0 { drawdown / peak * 100.0 } else { 0.0 };
            }
        }

        (max_dd, max_dd_pct)
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n══════════ SIMULATION REPORT ══════════");
        println!("  Initial equity:    {:>12.2}", self.initial_equity);
        println!("  Final equity:      {:>12.2}", self.final_equity);
        println!("  Total return:      {:>11.2}%", self.total_return_pct);
        println!("  Realised profit:   {:>12.2}", self.realized_profit);
        println!("  Max drawdown:      {:>12.2} ({:.2}%)", self.max_drawdown, self.max_drawdown_pct);
        println!("───────────────────────────────────────");
        println!("  Fills:             {:>12}", self.fills);
        println!("  Buys / adds:       {:>6} / {:<5}", self.buys, self.accumulations);
        println!("  Round trips:       {:>12}", self.round_trips);
        println!(
            "  Win rate:          {:>11.1}% ({} won, {} lost)",
            self.win_rate, self.winning_trades, self.losing_trades
        );
        println!("  Largest win:       {:>12.2}", self.largest_win);
        println!("  Largest loss:      {:>12.2}", self.largest_loss);
        println!("═══════════════════════════════════════\n");

        for trade in &self.trades {
            let profit = trade
                .profit
                .map(|p| format!(" profit {:.2}", p))
                .unwrap_or_default();
            println!(
                "  {} {:<10} {:<8} x{:<5} @ {:.2}{}",
                trade.timestamp.date_naive(),
                trade.kind.as_str(),
                trade.instrument,
                trade.quantity,
                trade.price,
                profit
            );
        }
    }
}
