use crate::{Error, Result};
use chrono::NaiveDate;

/// Per-instrument lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SignalState {
    #[default]
    None,
    /// Waiting for a BUY after an ATTENTION
    Attention {
        signal_id: i64,
        date: NaiveDate,
        close: f64,
    },
    /// Holding (or about to hold) a position; `lineage` is the originating ATTENTION
    InMarket { lineage: Option<i64> },
}

/// Events that move a [`SignalState`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    Attention {
        signal_id: i64,
        date: NaiveDate,
        close: f64,
    },
    Buy {
        parent_id: Option<i64>,
    },
    Accumulate,
    Sell,
}

impl SignalState {
    pub fn is_in_market(&self) -> bool {
        matches!(self, SignalState::InMarket { .. })
    }

    pub fn lineage(&self) -> Option<i64> {
        match self {
            SignalState::Attention { signal_id, .. } => Some(*signal_id),
            SignalState::InMarket { lineage } => *lineage,
            SignalState::None => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SignalState::None => "NONE",
            SignalState::Attention { .. } => "ATTENTION",
            SignalState::InMarket { .. } => "IN_MARKET",
        }
    }

    /// Apply a transition, rejecting moves the lifecycle does not allow
    ///
    /// A newer ATTENTION replaces a pending one.
    pub fn apply(self, transition: Transition) -> Result<SignalState> {
        use SignalState as S;
        use Transition as T;

        match (self, transition) {
            (
                S::None | S::Attention { .. },
                T::Attention {
                    signal_id,
                    date,
                    close,
                },
            ) => Ok(S::Attention {
                signal_id,
                date,
                close,
            }),
            (S::Attention { .. }, T::Buy { parent_id }) => Ok(S::InMarket { lineage: parent_id }),
            (state @ S::InMarket { .. }, T::Accumulate) => Ok(state),
            (S::InMarket { .. }, T::Sell) => Ok(S::None),
            (state, transition) => Err(Error::Invalid(format!(
                "transition {:?} not allowed from {}",
                transition,
                state.name()
            ))),
        }
    }
}
