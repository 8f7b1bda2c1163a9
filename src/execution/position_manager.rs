use crate::config::ExecutionConfig;
use crate::db::FillRecord;
use crate::models::{Fill, Position, TradeKind, TradeLog};
use chrono::{DateTime, Utc};

/// Sizing caps and the position arithmetic applied after fills
#[derive(Debug, Clone)]
pub struct PositionManager {
    pub commission_rate: f64,
    pub max_operation_amount: f64,
    pub max_shares_per_trade: i64,
}

impl From<&ExecutionConfig> for PositionManager {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            commission_rate: config.commission_rate,
            max_operation_amount: config.max_operation_amount,
            max_shares_per_trade: config.max_shares_per_trade,
        }
    }
}

impl PositionManager {
    /// `floor(min(max_operation_amount / price, max_shares_per_trade))`
    pub fn quantity_for(&self, price: f64) -> i64 {
        if !(price > 0.0) {
            return 0;
        }
        let by_amount = (self.max_operation_amount / price).floor() as i64;
        by_amount.min(self.max_shares_per_trade).max(0)
    }

    /// Cash needed for a buy, commission included
    pub fn buy_cost(&self, price: f64, quantity: i64) -> f64 {
        price * quantity as f64 * (1.0 + self.commission_rate)
    }

    pub fn sell_proceeds(&self, price: f64, quantity: i64) -> f64 {
        price * quantity as f64 * (1.0 - self.commission_rate)
    }

    /// First BUY fill: a fresh position at the fill price
    pub fn open(&self, instrument: &str, fill: Fill, signal_id: Option<i64>, at: DateTime<Utc>)
        -> FillRecord {
        FillRecord {
            position: Position {
                instrument: instrument.to_string(),
                average_price: Some(fill.price),
                quantity: fill.quantity,
                in_market: true,
                created_at: at,
                updated_at: Some(at),
            },
            trade: self.buy_trade(instrument, TradeKind::Buy, fill, at),
            signal_id,
        }
    }

    /// ACCUMULATE fill: weighted-average price, summed quantity
    pub fn accumulate(
        &self,
        position: &Position,
        fill: Fill,
        signal_id: Option<i64>,
        at: DateTime<Utc>,
    ) -> FillRecord {
        let old_qty = position.quantity.max(0);
        let old_avg = position.average_price.unwrap_or(fill.price);
        let new_qty = old_qty + fill.quantity;
        let new_avg = if new_qty > 0 {
            (old_avg * old_qty as f64 + fill.price * fill.quantity as f64) / new_qty as f64
        } else {
            fill.price
        };

        FillRecord {
            position: Position {
                average_price: Some(new_avg),
                quantity: new_qty,
                in_market: true,
                updated_at: Some(at),
                ..position.clone()
            },
            trade: self.buy_trade(&position.instrument, TradeKind::Accumulate, fill, at),
            signal_id,
        }
    }

    /// SELL fill of the whole position
    ///
    /// `profit = (price - average_price) * quantity * (1 - commission_rate)`
    pub fn close(
        &self,
        position: &Position,
        fill: Fill,
        signal_id: Option<i64>,
        at: DateTime<Utc>,
    ) -> FillRecord {
        let average = position.average_price.unwrap_or(fill.price);
        let profit = (fill.price - average) * fill.quantity as f64 * (1.0 - self.commission_rate);

        FillRecord {
            position: Position {
                average_price: None,
                quantity: 0,
                in_market: false,
                updated_at: Some(at),
                ..position.clone()
            },
            trade: TradeLog {
                instrument: position.instrument.clone(),
                kind: TradeKind::Sell,
                price: fill.price,
                quantity: fill.quantity,
                amount: self.sell_proceeds(fill.price, fill.quantity),
                profit: Some(profit),
                timestamp: at,
            },
            signal_id,
        }
    }

    fn buy_trade(&self, instrument: &str, kind: TradeKind, fill: Fill, at: DateTime<Utc>) -> TradeLog {
        TradeLog {
            instrument: instrument.to_string(),
            kind,
            price: fill.price,
            quantity: fill.quantity,
            amount: self.buy_cost(fill.price, fill.quantity),
            profit: None,
            timestamp: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(commission_rate: f64) -> PositionManager {
        PositionManager {
            commission_rate,
            max_operation_amount: 10_000.0,
            max_shares_per_trade: 100,
        }
    }

    #[test]
    fn test_quantity_caps() {
        let pm = manager(0.0);
        // amount cap binds
        assert_eq!(pm.quantity_for(250.0), 40);
        // share cap binds
        assert_eq!(pm.quantity_for(95.0), 100);
        // price above the amount cap
        assert_eq!(pm.quantity_for(20_000.0), 0);
        assert_eq!(pm.quantity_for(0.0), 0);
    }

    #[test]
    fn test_buy_cost_includes_commission() {
        let pm = manager(0.001);
        assert!((pm.buy_cost(100.0, 10) - 1001.0).abs() < 1e-9);
        assert!((pm.sell_proceeds(100.0, 10) - 999.0).abs() < 1e-9);
    }

    #[test]
    fn test_accumulate_weighted_average() {
        let pm = manager(0.0);
        let now = Utc::now();
        let opened = pm.open("SBER", Fill { price: 95.0, quantity: 100 }, Some(1), now);
        assert_eq!(opened.position.average_price, Some(95.0));

        let record = pm.accumulate(&opened.position, Fill { price: 90.0, quantity: 100 }, Some(2), now);
        assert_eq!(record.position.quantity, 200);
        assert_eq!(record.position.average_price, Some(92.5));
        assert_eq!(record.trade.kind, TradeKind::Accumulate);

        let record = pm.accumulate(&record.position, Fill { price: 80.0, quantity: 50 }, None, now);
        // (92.5 * 200 + 80 * 50) / 250
        assert_eq!(record.position.average_price, Some(90.0));
    }

    #[test]
    fn test_close_profit_and_reset() {
        let pm = manager(0.001);
        let now = Utc::now();
        let opened = pm.open("SBER", Fill { price: 95.0, quantity: 100 }, None, now);

        let record = pm.close(&opened.position, Fill { price: 110.0, quantity: 100 }, Some(9), now);
        let expected = (110.0 - 95.0) * 100.0 * (1.0 - 0.001);
        assert!((record.trade.profit.unwrap() - expected).abs() < 1e-9);
        assert_eq!(record.position.quantity, 0);
        assert!(record.position.average_price.is_none());
        assert!(!record.position.in_market);
        assert_eq!(record.signal_id, Some(9));
    }
}
