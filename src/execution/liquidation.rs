use super::position_manager::PositionManager;
use crate::api::Broker;
use crate::db::SignalStore;
use crate::models::{OrderSide, Position, TradeKind};
use crate::notify::{messages, Notifications};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One closed position in a liquidation report
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub instrument: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit: f64,
    pub return_pct: f64,
    pub days_held: i64,
}

/// Sells every open position at market
pub struct Liquidator {
    store: Arc<dyn SignalStore>,
    broker: Arc<dyn Broker>,
    notifications: Notifications,
    positions: PositionManager,
}

impl Liquidator {
    pub fn new(
        store: Arc<dyn SignalStore>,
        broker: Arc<dyn Broker>,
        notifications: Notifications,
        positions: PositionManager,
    ) -> Self {
        Self {
            store,
            broker,
            notifications,
            positions,
        }
    }

    /// Close all open positions, clear their lineage and report
    pub async fn close_all(&self) -> Result<Vec<ClosedPosition>> {
        let open = self.store.open_positions().await?;
        if open.is_empty() {
            tracing::info!("No open positions to close");
            self.notifications.send(&messages::liquidation(&[])).await;
            return Ok(Vec::new());
        }

        let mut closed = Vec::new();
        for position in open.iter().filter(|p| p.is_open()) {
            match self.close_one(position).await {
                Ok(entry) => closed.push(entry),
                Err(e) if e.is_unrecoverable() => return Err(e),
                Err(e) => {
                    tracing::error!("❌ Failed to close {}: {}", position.instrument, e);
                    self.notifications
                        .send(&messages::order_failed(&position.instrument, &e.to_string()))
                        .await;
                }
            }
        }

        self.notifications.send(&messages::liquidation(&closed)).await;
        Ok(closed)
    }

    async fn close_one(&self, position: &Position) -> Result<ClosedPosition> {
        let opened_at = self.entry_time(position).await?;

        let fill = self
            .broker
            .place_market_order(&position.instrument, position.quantity, OrderSide::Sell)
            .await?;
        let now = Utc::now();
        let record = self.positions.close(position, fill, None, now);
        self.store.record_fill(&record).await?;
        self.store.deactivate_lineage(&position.instrument).await?;

        let entry_price = position.average_price.unwrap_or(fill.price);
        let return_pct = if entry_price > 0.0 {
            (fill.price - entry_price) / entry_price * 100.0
        } else {
            0.0
        };

        tracing::info!(
            "🔻 Closed {} x{} @ {:.2} ({:+.2}%)",
            position.instrument,
            fill.quantity,
            fill.price,
            return_pct
        );

        Ok(ClosedPosition {
            instrument: position.instrument.clone(),
            quantity: fill.quantity,
            entry_price,
            exit_price: fill.price,
            profit: record.trade.profit.unwrap_or_default(),
            return_pct,
            days_held: (now - opened_at).num_days(),
        })
    }

    /// Time of the BUY that opened the current position
    async fn entry_time(&self, position: &Position) -> Result<DateTime<Utc>> {
        let trades = self.store.trade_history(Some(&position.instrument)).await?;
        Ok(trades
            .iter()
            .rev()
            .find(|t| t.kind == TradeKind::Buy)
            .map(|t| t.timestamp)
            .unwrap_or(position.created_at))
    }
}
