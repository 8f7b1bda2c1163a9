// Signal lifecycle: pure candidate rules, the state enum and the per-cycle processor
pub mod processor;
pub mod signals;
pub mod state;

pub use processor::{CycleSummary, SignalContext, SignalProcessor};
pub use state::{SignalState, Transition};
