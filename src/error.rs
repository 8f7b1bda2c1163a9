use thiserror::Error;

/// Errors surfaced by the trading pipeline.
///
/// Most variants are "skip and continue" failures for a single instrument.
/// Only [`Error::is_unrecoverable`] errors abort a whole cycle.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error ({status}): {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("instrument not found: {0}")]
    InstrumentNotFound(String),

    #[error("insufficient data for {instrument}: {detail}")]
    InsufficientData { instrument: String, detail: String },

    #[error("order rejected for {instrument}: {reason}")]
    OrderRejected { instrument: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the persistence store cannot be reached at all.
    ///
    /// Cycles abort on these instead of skipping the instrument.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Error::Migration(_) => true,
            _ => false,
        }
    }

    pub fn insufficient_data(instrument: &str, detail: impl Into<String>) -> Self {
        Error::InsufficientData {
            instrument: instrument.to_string(),
            detail: detail.into(),
        }
    }
}
