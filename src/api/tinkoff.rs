use super::{Broker, MarketData};
use crate::config::BrokerConfig;
use crate::models::{Candle, Fill, OrderSide};
use crate::throttle::Throttle;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// T-Invest API v2, REST gateway
const PRODUCTION_BASE: &str = "https://invest-public-api.tinkoff.ru/rest";
const SANDBOX_BASE: &str = "https://sandbox-invest-public-api.tinkoff.ru/rest";
const SERVICE_PREFIX: &str = "tinkoff.public.invest.api.contract.v1";
const MAX_RETRIES: u32 = 3;
const CHUNK_DAYS: i64 = 365;

/// Instrument identifiers resolved from a ticker
#[derive(Debug, Clone)]
struct InstrumentInfo {
    figi: String,
    uid: String,
    lot: i64,
}

/// T-Invest client: market data and broker in one
///
/// Cloneable; clones share the instrument cache and throttle.
#[derive(Clone)]
pub struct TinkoffClient {
    client: Client,
    base_url: String,
    token: String,
    class_code: String,
    sandbox: bool,
    account_id: Arc<RwLock<Option<String>>>,
    instruments: Arc<RwLock<HashMap<String, InstrumentInfo>>>,
    order_throttle: Throttle,
    retry_base_ms: u64,
}

/// Fixed-point price as sent by the API ({units, nano})
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct Quotation {
    #[serde(default, deserialize_with = "de_i64")]
    units: i64,
    #[serde(default)]
    nano: i32,
}

impl Quotation {
    fn to_f64(self) -> f64 {
        self.units as f64 + self.nano as f64 / 1e9
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentResponse {
    instrument: InstrumentPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentPayload {
    figi: String,
    uid: String,
    #[serde(default = "default_lot")]
    lot: i64,
}

fn default_lot() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<HistoricCandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoricCandle {
    open: Quotation,
    high: Quotation,
    low: Quotation,
    close: Quotation,
    #[serde(default, deserialize_with = "de_i64")]
    volume: i64,
    time: DateTime<Utc>,
    #[serde(default)]
    is_complete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastPricesResponse {
    #[serde(default)]
    last_prices: Vec<LastPrice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastPrice {
    price: Option<Quotation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionsResponse {
    #[serde(default)]
    money: Vec<MoneyValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoneyValue {
    currency: String,
    #[serde(default, deserialize_with = "de_i64")]
    units: i64,
    #[serde(default)]
    nano: i32,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostOrderResponse {
    #[serde(default)]
    execution_report_status: String,
    #[serde(default, deserialize_with = "de_i64")]
    lots_executed: i64,
    executed_order_price: Option<Quotation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostOrderRequest<'a> {
    instrument_id: &'a str,
    quantity: String,
    direction: &'static str,
    account_id: &'a str,
    order_type: &'static str,
    order_id: String,
}

/// int64 fields arrive as JSON strings from the REST gateway
fn de_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(i64),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl TinkoffClient {
    /// Create a client from broker settings
    ///
    /// # Arguments
    /// * `config` - Token, account, sandbox flag and optional host override
    /// * `order_throttle` - Spacing applied before every order
    pub fn new(config: &BrokerConfig, order_throttle: Throttle) -> Result<Self> {
        if config.token.is_empty() {
            return Err(Error::Invalid("broker.token is not set".to_string()));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let base_url = config.base_url.clone().unwrap_or_else(|| {
            if config.sandbox {
                SANDBOX_BASE.to_string()
            } else {
                PRODUCTION_BASE.to_string()
            }
        });

        let account_id = (!config.account_id.is_empty()).then(|| config.account_id.clone());

        tracing::info!(
            "T-Invest client ready ({} mode)",
            if config.sandbox { "sandbox" } else { "live" }
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            class_code: config.class_code.clone(),
            sandbox: config.sandbox,
            account_id: Arc::new(RwLock::new(account_id)),
            instruments: Arc::new(RwLock::new(HashMap::new())),
            order_throttle,
            retry_base_ms: 1000,
        })
    }

    /// Base delay for retry backoff (doubles each attempt)
    pub fn with_retry_base_ms(mut self, ms: u64) -> Self {
        self.retry_base_ms = ms;
        self
    }

    fn url(&self, service: &str, method: &str) -> String {
        format!("{}/{}.{}/{}", self.base_url, SERVICE_PREFIX, service, method)
    }

    /// One POST, no retries
    async fn call_once<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(service, method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(Error::Api {
            service: "tinkoff",
            status: status.as_u16(),
            body: text,
        })
    }

    /// Idempotent read with retry on 429 / 5xx / network errors
    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            match self.call_once(service, method, &body).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < MAX_RETRIES && is_retryable(&e) => {
                    let backoff_ms = self.retry_base_ms * 2u64.pow(attempt);
                    tracing::warn!(
                        "T-Invest {}/{} failed: {}, retrying in {}ms (attempt {}/{})",
                        service,
                        method,
                        e,
                        backoff_ms,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve ticker to FIGI/UID/lot (shares first, then ETFs)
    async fn instrument(&self, ticker: &str) -> Result<InstrumentInfo> {
        if let Some(info) = self.instruments.read().await.get(ticker) {
            return Ok(info.clone());
        }

        let body = json!({
            "idType": "INSTRUMENT_ID_TYPE_TICKER",
            "classCode": self.class_code,
            "id": ticker,
        });

        let mut found = None;
        for method in ["ShareBy", "EtfBy"] {
            match self
                .call::<InstrumentResponse>("InstrumentsService", method, body.clone())
                .await
            {
                Ok(response) => {
                    found = Some(response.instrument);
                    break;
                }
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e),
            }
        }

        let payload = found.ok_or_else(|| Error::InstrumentNotFound(ticker.to_string()))?;
        let info = InstrumentInfo {
            figi: payload.figi,
            uid: payload.uid,
            lot: payload.lot.max(1),
        };
        tracing::debug!("Resolved {} -> {} (lot {})", ticker, info.figi, info.lot);

        self.instruments
            .write()
            .await
            .insert(ticker.to_string(), info.clone());
        Ok(info)
    }

    async fn account_id(&self) -> Result<String> {
        if let Some(id) = self.account_id.read().await.clone() {
            return Ok(id);
        }

        let (service, method) = if self.sandbox {
            ("SandboxService", "GetSandboxAccounts")
        } else {
            ("UsersService", "GetAccounts")
        };
        let response: AccountsResponse = self.call(service, method, json!({})).await?;
        let id = response
            .accounts
            .into_iter()
            .next()
            .map(|a| a.id)
            .ok_or_else(|| Error::Invalid("broker has no open accounts".to_string()))?;

        *self.account_id.write().await = Some(id.clone());
        Ok(id)
    }
}

fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        Error::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

fn is_not_found(error: &Error) -> bool {
    match error {
        Error::Api { status, body, .. } => {
            *status == 404 || body.to_ascii_lowercase().contains("not found")
        }
        _ => false,
    }
}

#[async_trait]
impl MarketData for TinkoffClient {
    async fn fetch_daily_candles(
        &self,
        instrument: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let info = self.instrument(instrument).await?;
        let mut candles = Vec::new();
        let mut chunk_start = from;

        while chunk_start <= to {
            let chunk_end = (chunk_start + Duration::days(CHUNK_DAYS)).min(to + Duration::days(1));
            let body = json!({
                "instrumentId": info.uid,
                "from": chunk_start.and_time(NaiveTime::MIN).and_utc().to_rfc3339(),
                "to": chunk_end.and_time(NaiveTime::MIN).and_utc().to_rfc3339(),
                "interval": "CANDLE_INTERVAL_DAY",
            });
            let response: CandlesResponse = self
                .call("MarketDataService", "GetCandles", body)
                .await?;

            candles.extend(
                response
                    .candles
                    .into_iter()
                    .filter(|c| c.is_complete)
                    .map(|c| Candle {
                        instrument: instrument.to_string(),
                        date: c.time.date_naive(),
                        open: c.open.to_f64(),
                        high: c.high.to_f64(),
                        low: c.low.to_f64(),
                        close: c.close.to_f64(),
                        volume: c.volume,
                    })
                    .filter(|c| c.date >= from && c.date <= to),
            );
            chunk_start = chunk_end;
        }

        candles.sort_by_key(|c| c.date);
        candles.dedup_by_key(|c| c.date);
        tracing::debug!("Fetched {} daily candles for {}", candles.len(), instrument);
        Ok(candles)
    }
}

#[async_trait]
impl Broker for TinkoffClient {
    async fn place_market_order(
        &self,
        instrument: &str,
        quantity: i64,
        side: OrderSide,
    ) -> Result<Fill> {
        let info = self.instrument(instrument).await?;
        let lots = quantity / info.lot;
        if lots <= 0 {
            return Err(Error::OrderRejected {
                instrument: instrument.to_string(),
                reason: format!("{} shares is less than one lot of {}", quantity, info.lot),
            });
        }

        let account_id = self.account_id().await?;
        let request = PostOrderRequest {
            instrument_id: &info.uid,
            quantity: lots.to_string(),
            direction: match side {
                OrderSide::Buy => "ORDER_DIRECTION_BUY",
                OrderSide::Sell => "ORDER_DIRECTION_SELL",
            },
            account_id: &account_id,
            order_type: "ORDER_TYPE_MARKET",
            order_id: uuid::Uuid::new_v4().to_string(),
        };
        let (service, method) = if self.sandbox {
            ("SandboxService", "PostSandboxOrder")
        } else {
            ("OrdersService", "PostOrder")
        };

        self.order_throttle.wait().await;
        let response: PostOrderResponse = self
            .call_once(service, method, &serde_json::to_value(&request)?)
            .await?;

        let filled = matches!(
            response.execution_report_status.as_str(),
            "EXECUTION_REPORT_STATUS_FILL" | "EXECUTION_REPORT_STATUS_PARTIALLYFILL"
        );
        if !filled || response.lots_executed <= 0 {
            return Err(Error::OrderRejected {
                instrument: instrument.to_string(),
                reason: format!("order status {}", response.execution_report_status),
            });
        }

        let price = match response.executed_order_price.map(Quotation::to_f64) {
            Some(p) if p > 0.0 => p,
            _ => self.get_last_price(instrument).await?,
        };

        Ok(Fill {
            price,
            quantity: response.lots_executed * info.lot,
        })
    }

    async fn get_cash_balance(&self) -> Result<f64> {
        let account_id = self.account_id().await?;
        let (service, method) = if self.sandbox {
            ("SandboxService", "GetSandboxPositions")
        } else {
            ("OperationsService", "GetPositions")
        };
        let response: PositionsResponse = self
            .call(service, method, json!({ "accountId": account_id }))
            .await?;

        Ok(response
            .money
            .iter()
            .filter(|m| m.currency.eq_ignore_ascii_case("rub"))
            .map(|m| m.units as f64 + m.nano as f64 / 1e9)
            .sum())
    }

    async fn get_last_price(&self, instrument: &str) -> Result<f64> {
        let info = self.instrument(instrument).await?;
        let response: LastPricesResponse = self
            .call(
                "MarketDataService",
                "GetLastPrices",
                json!({ "instrumentId": [info.uid] }),
            )
            .await?;

        response
            .last_prices
            .into_iter()
            .find_map(|p| p.price)
            .map(Quotation::to_f64)
            .filter(|p| *p > 0.0)
            .ok_or_else(|| Error::Api {
                service: "tinkoff",
                status: 200,
                body: format!("no last price for {}", instrument),
            })
    }
}
