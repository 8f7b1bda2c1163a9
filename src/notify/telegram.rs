use super::Notifier;
use crate::config::TelegramConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API sender
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    max_retries: u32,
    retry_base_ms: u64,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::Invalid(
                "telegram.bot_token and telegram.chat_id must be set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            max_retries: config.max_retries.max(1),
            retry_base_ms: 1000,
        })
    }

    /// Base delay for retry backoff (doubles each attempt)
    pub fn with_retry_base_ms(mut self, ms: u64) -> Self {
        self.retry_base_ms = ms;
        self
    }

    async fn send_once(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Api {
                service: "telegram",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendMessageResponse = serde_json::from_str(&body)?;
        if !parsed.ok {
            return Err(Error::Api {
                service: "telegram",
                status: status.as_u16(),
                body: parsed.description.unwrap_or(body),
            });
        }
        Ok(())
    }
}

fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Http(_) => true,
        Error::Api { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_message(&self, text: &str) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.send_once(text).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let backoff_ms = self.retry_base_ms * 2u64.pow(attempt);
                    tracing::warn!(
                        "Telegram send failed: {}, retrying in {}ms (attempt {}/{})",
                        e,
                        backoff_ms,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
