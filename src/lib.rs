// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod strategy;
pub mod throttle;

// Re-export commonly used types
pub use error::Error;
pub use models::*;

pub type Result<T> = std::result::Result<T, Error>;
