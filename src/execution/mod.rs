// Order execution: signal -> order decisions, position arithmetic, liquidation
pub mod executor;
pub mod liquidation;
pub mod position_manager;

pub use executor::{
    Balance, ExecutionAction, ExecutionDecision, ExecutionOutcome, ExecutionReport, TradeExecutor,
};
pub use liquidation::{ClosedPosition, Liquidator};
pub use position_manager::PositionManager;
