use crate::indicators::BandConfig;
use crate::{Error, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_PREFIX: &str = "SWINGBOT";

/// Top-level runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub instruments: Vec<String>,
    pub database_url: String,
    pub indicators: BandConfig,
    pub signals: SignalConfig,
    pub execution: ExecutionConfig,
    pub broker: BrokerConfig,
    pub telegram: TelegramConfig,
    pub ingest: IngestConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instruments: vec!["SBER".to_string(), "GAZP".to_string(), "LKOH".to_string()],
            database_url: "postgres://localhost/swingbot".to_string(),
            indicators: BandConfig::default(),
            signals: SignalConfig::default(),
            execution: ExecutionConfig::default(),
            broker: BrokerConfig::default(),
            telegram: TelegramConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Number of most recent indicator rows scanned per cycle
    pub lookback_days: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self { lookback_days: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Rows the executor needs to make a decision
    pub lookback_days: usize,
    pub commission_rate: f64,
    pub max_operation_amount: f64,
    pub max_shares_per_trade: i64,
    /// Minimum delay between broker calls (0 disables)
    pub order_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            lookback_days: 2,
            commission_rate: 0.0005,
            max_operation_amount: 10_000.0,
            max_shares_per_trade: 100,
            order_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub token: String,
    pub account_id: String,
    pub sandbox: bool,
    pub class_code: String,
    /// Overrides the production/sandbox host
    pub base_url: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            account_id: String::new(),
            sandbox: true,
            class_code: "TQBR".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Prepended to every operator message
    pub message_prefix: Option<String>,
    /// Minimum delay between messages (0 disables)
    pub send_delay_ms: u64,
    pub max_retries: u32,
    pub base_url: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            message_prefix: None,
            send_delay_ms: 3000,
            max_retries: 3,
            base_url: None,
        }
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// How far back to fetch for an instrument with no stored candles
    pub history_days: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { history_days: 730 }
    }
}

impl Settings {
    /// Load settings: defaults, then `config/default.toml`, then an explicit
    /// file, then `SWINGBOT_*` environment variables.
    ///
    /// # Arguments
    /// * `path` - Optional extra config file (e.g. from `--config`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("instruments")
                .try_parsing(true),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database_url = url;
        }

        settings.instruments = settings
            .instruments
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(Error::Invalid("no instruments configured".to_string()));
        }
        self.indicators.validate()?;

        if self.signals.lookback_days < 2 {
            return Err(Error::Invalid(
                "signals.lookback_days must be at least 2".to_string(),
            ));
        }
        if self.execution.lookback_days < 2 {
            return Err(Error::Invalid(
                "execution.lookback_days must be at least 2".to_string(),
            ));
        }

        let exec = &self.execution;
        if !(0.0..1.0).contains(&exec.commission_rate) {
            return Err(Error::Invalid(format!(
                "commission_rate must be in [0, 1), got {}",
                exec.commission_rate
            )));
        }
        if !(exec.max_operation_amount > 0.0) {
            return Err(Error::Invalid(format!(
                "max_operation_amount must be positive, got {}",
                exec.max_operation_amount
            )));
        }
        if exec.max_shares_per_trade <= 0 {
            return Err(Error::Invalid(format!(
                "max_shares_per_trade must be positive, got {}",
                exec.max_shares_per_trade
            )));
        }
        if self.ingest.history_days <= 0 {
            return Err(Error::Invalid(
                "ingest.history_days must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.indicators.window, 20);
        assert_eq!(settings.signals.lookback_days, 5);
        assert_eq!(settings.execution.lookback_days, 2);
    }

    #[test]
    fn test_rejects_bad_commission() {
        let mut settings = Settings::default();
        settings.execution.commission_rate = 1.0;
        assert!(settings.validate().is_err());

        settings.execution.commission_rate = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_caps() {
        let mut settings = Settings::default();
        settings.execution.max_shares_per_trade = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.execution.max_operation_amount = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_instruments() {
        let mut settings = Settings::default();
        settings.instruments.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("swingbot-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bot.toml");
        std::fs::write(
            &path,
            r#"
instruments = ["sber", "  moex "]

[indicators]
window = 10
num_std = 1.5

[execution]
max_shares_per_trade = 7
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.instruments, vec!["SBER", "MOEX"]);
        assert_eq!(settings.indicators.window, 10);
        assert_eq!(settings.indicators.num_std, 1.5);
        assert_eq!(settings.execution.max_shares_per_trade, 7);
        // untouched sections keep their defaults
        assert_eq!(settings.telegram.send_delay_ms, 3000);

        std::fs::remove_dir_all(&dir).ok();
    }
}
