use super::position_manager::PositionManager;
use crate::api::Broker;
use crate::db::SignalStore;
use crate::models::{Fill, Position, Signal, SignalKind, TradeKind};
use crate::notify::{messages, Notifications};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    Buy { signal_id: i64, quantity: i64 },
    Accumulate { signal_id: i64, quantity: i64 },
    Sell { signal_id: i64, quantity: i64 },
    /// Capital check failed; the operator is told
    InsufficientCash,
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: reason.into(),
        }
    }
}

/// What happened to one instrument in an execution cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Executed {
        kind: TradeKind,
        fill: Fill,
        profit: Option<f64>,
    },
    Skipped { reason: String },
    Failed { error: String },
}

/// Account value at the start of a cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub cash: f64,
    /// Open positions at the broker's last price
    pub shares: f64,
}

impl Balance {
    pub fn total(&self) -> f64 {
        self.cash + self.shares
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub starting_balance: Option<Balance>,
    pub repaired: u64,
    pub outcomes: Vec<(String, ExecutionOutcome)>,
}

impl ExecutionReport {
    pub fn trades(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ExecutionOutcome::Executed { .. }))
            .count()
    }

    pub fn outcome(&self, instrument: &str) -> Option<&ExecutionOutcome> {
        self.outcomes
            .iter()
            .find(|(i, _)| i == instrument)
            .map(|(_, o)| o)
    }
}

/// Turns logged signals into orders, reading only the store and the broker
pub struct TradeExecutor {
    store: Arc<dyn SignalStore>,
    broker: Arc<dyn Broker>,
    notifications: Notifications,
    positions: PositionManager,
    lookback: usize,
}

impl TradeExecutor {
    /// # Arguments
    /// * `positions` - Sizing caps and commission
    /// * `lookback` - Stored candles required before trading an instrument
    pub fn new(
        store: Arc<dyn SignalStore>,
        broker: Arc<dyn Broker>,
        notifications: Notifications,
        positions: PositionManager,
        lookback: usize,
    ) -> Self {
        Self {
            store,
            broker,
            notifications,
            positions,
            lookback,
        }
    }

    /// One execution cycle over all instruments
    ///
    /// Repairs inconsistent positions before and after. Aborts only when the
    /// store is unreachable.
    pub async fn run_cycle(&self, instruments: &[String]) -> Result<ExecutionReport> {
        let mut report = ExecutionReport {
            repaired: self.repair().await?,
            ..ExecutionReport::default()
        };

        report.starting_balance = self.balance().await?;

        for instrument in instruments {
            let outcome = match self.execute_instrument(instrument).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_unrecoverable() => {
                    tracing::error!("❌ Execution cycle aborted at {}: {}", instrument, e);
                    return Err(e);
                }
                Err(e @ Error::InsufficientData { .. }) => {
                    tracing::warn!("⚠️  Skipping {}: {}", instrument, e);
                    ExecutionOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    tracing::error!("❌ {} execution failed: {}", instrument, e);
                    self.notifications
                        .send(&messages::order_failed(instrument, &e.to_string()))
                        .await;
                    ExecutionOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.outcomes.push((instrument.clone(), outcome));
        }

        report.repaired += self.repair().await?;

        tracing::info!(
            "✅ Execution cycle finished: {} trades, {} instruments",
            report.trades(),
            report.outcomes.len()
        );
        self.notifications
            .send(&messages::execution_finished(&report))
            .await;

        Ok(report)
    }

    /// Cash plus open positions valued at the last price
    ///
    /// A position without a quote is left out of the share value.
    async fn balance(&self) -> Result<Option<Balance>> {
        let cash = match self.broker.get_cash_balance().await {
            Ok(cash) => cash,
            Err(e) => {
                tracing::warn!("⚠️  Could not read cash balance: {}", e);
                return Ok(None);
            }
        };

        let mut shares = 0.0;
        for position in self.store.open_positions().await? {
            match self.broker.get_last_price(&position.instrument).await {
                Ok(price) => shares += price * position.quantity as f64,
                Err(e) => tracing::warn!(
                    "⚠️  No last price for {}, left out of the balance: {}",
                    position.instrument,
                    e
                ),
            }
        }

        let balance = Balance { cash, shares };
        tracing::info!(
            "💰 Balance: cash {:.2}, shares {:.2}, total {:.2}",
            cash,
            shares,
            balance.total()
        );
        Ok(Some(balance))
    }

    async fn repair(&self) -> Result<u64> {
        let repaired = self.store.repair_positions().await?;
        if repaired > 0 {
            tracing::warn!("🔧 Reset {} inconsistent positions", repaired);
        }
        Ok(repaired)
    }

    /// Decide and, if warranted, trade one instrument
    pub async fn execute_instrument(&self, instrument: &str) -> Result<ExecutionOutcome> {
        let Some(latest) = self.store.last_candle_date(instrument).await? else {
            return Err(Error::insufficient_data(instrument, "no stored candles"));
        };
        let rows = self
            .store
            .recent_rows(instrument, latest, self.lookback)
            .await?;
        if rows.len() < 2 {
            return Err(Error::insufficient_data(
                instrument,
                format!("{} indicator row(s)", rows.len()),
            ));
        }

        let pending = self.store.pending_executions(instrument, latest).await?;
        if pending.is_empty() {
            tracing::debug!("{}: nothing to execute", instrument);
            return Ok(ExecutionOutcome::Skipped {
                reason: "no pending signals".to_string(),
            });
        }

        let position = self
            .store
            .position(instrument)
            .await?
            .filter(Position::is_open);

        let decision = self.decide(instrument, &pending, position.as_ref()).await?;
        tracing::info!("{}: {:?} ({})", instrument, decision.action, decision.reason);

        let (kind, signal_id, quantity) = match decision.action {
            ExecutionAction::InsufficientCash => {
                self.notifications
                    .send(&messages::insufficient_cash(instrument, &decision.reason))
                    .await;
                return Ok(ExecutionOutcome::Skipped {
                    reason: decision.reason,
                });
            }
            ExecutionAction::Skip => {
                return Ok(ExecutionOutcome::Skipped {
                    reason: decision.reason,
                });
            }
            ExecutionAction::Buy {
                signal_id,
                quantity,
            } => (TradeKind::Buy, signal_id, quantity),
            ExecutionAction::Accumulate {
                signal_id,
                quantity,
            } => (TradeKind::Accumulate, signal_id, quantity),
            ExecutionAction::Sell {
                signal_id,
                quantity,
            } => (TradeKind::Sell, signal_id, quantity),
        };

        let fill = self
            .broker
            .place_market_order(instrument, quantity, kind.side())
            .await?;

        let now = Utc::now();
        let record = match (kind, &position) {
            (TradeKind::Buy, _) => self.positions.open(instrument, fill, Some(signal_id), now),
            (TradeKind::Accumulate, Some(open)) => {
                self.positions.accumulate(open, fill, Some(signal_id), now)
            }
            (TradeKind::Sell, Some(open)) => self.positions.close(open, fill, Some(signal_id), now),
            (_, None) => {
                return Err(Error::Store(format!(
                    "{} fill without an open position",
                    kind.as_str()
                )))
            }
        };
        self.store.record_fill(&record).await?;

        tracing::info!(
            "💹 {} {} {} @ {:.2}",
            kind.as_str(),
            fill.quantity,
            instrument,
            fill.price
        );
        self.notifications
            .send(&messages::fill(instrument, &record))
            .await;

        Ok(ExecutionOutcome::Executed {
            kind,
            fill,
            profit: record.trade.profit,
        })
    }

    /// BUY without a position, else ACCUMULATE with one, else SELL with one
    async fn decide(
        &self,
        instrument: &str,
        pending: &[Signal],
        position: Option<&Position>,
    ) -> Result<ExecutionDecision> {
        let find = |kind: SignalKind| pending.iter().rev().find(|s| s.kind == kind);

        match (position, find(SignalKind::Buy), find(SignalKind::Accumulate), find(SignalKind::Sell)) {
            (None, Some(buy), _, _) => {
                self.sized_buy(instrument, buy.id, |signal_id, quantity| {
                    ExecutionAction::Buy {
                        signal_id,
                        quantity,
                    }
                })
                .await
            }
            (Some(_), _, Some(accumulate), _) => {
                self.sized_buy(instrument, accumulate.id, |signal_id, quantity| {
                    ExecutionAction::Accumulate {
                        signal_id,
                        quantity,
                    }
                })
                .await
            }
            (Some(open), _, _, Some(sell)) => Ok(ExecutionDecision {
                action: ExecutionAction::Sell {
                    signal_id: sell.id,
                    quantity: open.quantity,
                },
                reason: format!("SELL signal {} for full position", sell.id),
            }),
            (None, _, _, _) => Ok(ExecutionDecision::skip("no open position for pending signal")),
            (Some(_), _, _, _) => Ok(ExecutionDecision::skip("position already open")),
        }
    }

    async fn sized_buy(
        &self,
        instrument: &str,
        signal_id: i64,
        action: impl FnOnce(i64, i64) -> ExecutionAction,
    ) -> Result<ExecutionDecision> {
        let price = self.broker.get_last_price(instrument).await?;
        let quantity = self.positions.quantity_for(price);
        if quantity == 0 {
            return Ok(ExecutionDecision::skip(format!(
                "price {:.2} exceeds max operation amount {:.2}",
                price, self.positions.max_operation_amount
            )));
        }

        let cost = self.positions.buy_cost(price, quantity);
        let cash = self.broker.get_cash_balance().await?;
        if cash < cost {
            return Ok(ExecutionDecision {
                action: ExecutionAction::InsufficientCash,
                reason: format!(
                    "insufficient cash: need {:.2} for {} @ {:.2}, have {:.2}",
                    cost, quantity, price, cash
                ),
            });
        }

        Ok(ExecutionDecision {
            action: action(signal_id, quantity),
            reason: format!("{} shares @ {:.2}, cost {:.2}", quantity, price, cost),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperBroker;
    use crate::db::MemoryStore;
    use crate::models::{Bands, Candle, CandleRecord, NewSignal};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, d).unwrap()
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let rows: Vec<CandleRecord> = (1..=2)
            .map(|d| CandleRecord {
                candle: Candle {
                    instrument: "SBER".to_string(),
                    date: day(d),
                    open: 100.0,
                    high: 100.0,
                    low: 100.0,
                    close: 100.0,
                    volume: 1,
                },
                bands: Some(Bands {
                    sma: 100.0,
                    std: 1.0,
                    upper: 102.0,
                    lower: 98.0,
                }),
            })
            .collect();
        store.insert_candles("SBER", &rows).await.unwrap();
        store
    }

    fn executor(store: Arc<MemoryStore>, broker: Arc<PaperBroker>) -> TradeExecutor {
        TradeExecutor::new(
            store,
            broker,
            Notifications::disabled(),
            PositionManager {
                commission_rate: 0.0,
                max_operation_amount: 10_000.0,
                max_shares_per_trade: 100,
            },
            2,
        )
    }

    #[tokio::test]
    async fn test_cycle_reports_cash_and_share_value() {
        let store = seeded_store().await;
        store
            .record_fill(&PositionManager {
                commission_rate: 0.0,
                max_operation_amount: 10_000.0,
                max_shares_per_trade: 100,
            }
            .open(
                "SBER",
                Fill {
                    price: 100.0,
                    quantity: 10,
                },
                None,
                Utc::now(),
            ))
            .await
            .unwrap();
        let broker = Arc::new(PaperBroker::new(50_000.0, 0.0));
        broker.set_price("SBER", 120.0);

        let report = executor(store, broker)
            .run_cycle(&["SBER".to_string()])
            .await
            .unwrap();
        let balance = report.starting_balance.unwrap();
        assert_eq!(balance.cash, 50_000.0);
        assert!((balance.shares - 1_200.0).abs() < 1e-9);
        assert!((balance.total() - 51_200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stale_buy_is_not_executed() {
        let store = seeded_store().await;
        store
            .insert_signal(&NewSignal::new("SBER", SignalKind::Buy, day(1), None))
            .await
            .unwrap();
        let broker = Arc::new(PaperBroker::new(100_000.0, 0.0));
        broker.set_price("SBER", 100.0);

        let outcome = executor(store, broker.clone())
            .execute_instrument("SBER")
            .await
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Skipped { .. }));
        assert_eq!(broker.order_count(), 0);
    }

    #[tokio::test]
    async fn test_buy_opens_position() {
        let store = seeded_store().await;
        store
            .insert_signal(&NewSignal::new("SBER", SignalKind::Buy, day(2), None))
            .await
            .unwrap();
        let broker = Arc::new(PaperBroker::new(100_000.0, 0.0));
        broker.set_price("SBER", 250.0);

        let outcome = executor(store.clone(), broker)
            .execute_instrument("SBER")
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ExecutionOutcome::Executed {
                kind: TradeKind::Buy,
                ..
            }
        ));
        let position = store.position("SBER").await.unwrap().unwrap();
        assert_eq!(position.quantity, 40);
        assert_eq!(position.average_price, Some(250.0));
    }

    #[tokio::test]
    async fn test_single_row_is_data_integrity_skip() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_candles(
                "SBER",
                &[CandleRecord {
                    candle: Candle {
                        instrument: "SBER".to_string(),
                        date: day(1),
                        open: 1.0,
                        high: 1.0,
                        low: 1.0,
                        close: 1.0,
                        volume: 1,
                    },
                    bands: None,
                }],
            )
            .await
            .unwrap();
        let broker = Arc::new(PaperBroker::new(0.0, 0.0));
        let report = executor(store, broker)
            .run_cycle(&["SBER".to_string()])
            .await
            .unwrap();
        assert!(matches!(
            report.outcome("SBER"),
            Some(ExecutionOutcome::Skipped { .. })
        ));
    }

    struct RejectingBroker;

    #[async_trait::async_trait]
    impl Broker for RejectingBroker {
        async fn place_market_order(&self, instrument: &str, _: i64, _: crate::models::OrderSide) -> Result<Fill> {
            Err(Error::OrderRejected {
                instrument: instrument.to_string(),
                reason: "market closed".to_string(),
            })
        }

        async fn get_cash_balance(&self) -> Result<f64> {
            Ok(1_000_000.0)
        }

        async fn get_last_price(&self, _: &str) -> Result<f64> {
            Ok(100.0)
        }
    }

    #[tokio::test]
    async fn test_failed_order_leaves_state_untouched() {
        let store = seeded_store().await;
        store
            .insert_signal(&NewSignal::new("SBER", SignalKind::Buy, day(2), None))
            .await
            .unwrap();

        let executor = TradeExecutor::new(
            store.clone(),
            Arc::new(RejectingBroker),
            Notifications::disabled(),
            PositionManager {
                commission_rate: 0.0,
                max_operation_amount: 10_000.0,
                max_shares_per_trade: 100,
            },
            2,
        );
        let report = executor.run_cycle(&["SBER".to_string()]).await.unwrap();

        assert!(matches!(
            report.outcome("SBER"),
            Some(ExecutionOutcome::Failed { .. })
        ));
        assert!(store.position("SBER").await.unwrap().is_none());
        assert!(store.trade_history(None).await.unwrap().is_empty());
        // still pending for a retry next cycle
        assert_eq!(store.pending_executions("SBER", day(2)).await.unwrap().len(), 1);
    }
}
