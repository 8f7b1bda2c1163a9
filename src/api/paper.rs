use super::Broker;
use crate::models::{Fill, OrderSide};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Account {
    cash: f64,
    holdings: HashMap<String, i64>,
    prices: HashMap<String, f64>,
    orders: usize,
}

/// Simulated broker: fills every market order at the current price
///
/// Commission is charged on cash the same way the executor accounts for it.
#[derive(Debug, Default)]
pub struct PaperBroker {
    account: Mutex<Account>,
    commission_rate: f64,
}

impl PaperBroker {
    pub fn new(initial_cash: f64, commission_rate: f64) -> Self {
        Self {
            account: Mutex::new(Account {
                cash: initial_cash,
                ..Account::default()
            }),
            commission_rate,
        }
    }

    pub fn set_price(&self, instrument: &str, price: f64) {
        if let Ok(mut account) = self.account.lock() {
            account.prices.insert(instrument.to_string(), price);
        }
    }

    pub fn cash(&self) -> f64 {
        self.account.lock().map(|a| a.cash).unwrap_or_default()
    }

    pub fn holding(&self, instrument: &str) -> i64 {
        self.account
            .lock()
            .ok()
            .and_then(|a| a.holdings.get(instrument).copied())
            .unwrap_or(0)
    }

    /// Cash plus holdings marked at the last known prices
    pub fn equity(&self) -> f64 {
        self.account
            .lock()
            .map(|a| {
                a.cash
                    + a.holdings
                        .iter()
                        .map(|(i, q)| *q as f64 * a.prices.get(i).copied().unwrap_or(0.0))
                        .sum::<f64>()
            })
            .unwrap_or_default()
    }

    pub fn order_count(&self) -> usize {
        self.account.lock().map(|a| a.orders).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Account>> {
        self.account
            .lock()
            .map_err(|_| Error::Store("paper account lock poisoned".to_string()))
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn place_market_order(
        &self,
        instrument: &str,
        quantity: i64,
        side: OrderSide,
    ) -> Result<Fill> {
        let mut account = self.lock()?;
        let reject = |reason: String| Error::OrderRejected {
            instrument: instrument.to_string(),
            reason,
        };

        if quantity <= 0 {
            return Err(reject(format!("invalid quantity {}", quantity)));
        }
        let price = *account
            .prices
            .get(instrument)
            .ok_or_else(|| reject("no price".to_string()))?;

        match side {
            OrderSide::Buy => {
                let cost = price * quantity as f64 * (1.0 + self.commission_rate);
                if cost > account.cash {
                    return Err(reject(format!(
                        "cash {:.2} below cost {:.2}",
                        account.cash, cost
                    )));
                }
                account.cash -= cost;
                *account.holdings.entry(instrument.to_string()).or_insert(0) += quantity;
            }
            OrderSide::Sell => {
                let held = account.holdings.get(instrument).copied().unwrap_or(0);
                if held < quantity {
                    return Err(reject(format!("holding {} below {}", held, quantity)));
                }
                account.cash += price * quantity as f64 * (1.0 - self.commission_rate);
                if held == quantity {
                    account.holdings.remove(instrument);
                } else {
                    account.holdings.insert(instrument.to_string(), held - quantity);
                }
            }
        }

        account.orders += 1;
        Ok(Fill { price, quantity })
    }

    async fn get_cash_balance(&self) -> Result<f64> {
        Ok(self.lock()?.cash)
    }

    async fn get_last_price(&self, instrument: &str) -> Result<f64> {
        self.lock()?
            .prices
            .get(instrument)
            .copied()
            .ok_or_else(|| Error::InstrumentNotFound(instrument.to_string()))
    }
}
