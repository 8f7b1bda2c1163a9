pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use metrics::SimulationMetrics;
pub use runner::{ReplayFeed, SimulationConfig, SimulationReport, Simulator};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
