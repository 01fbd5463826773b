//! The predictor's per-bar emission.

use serde::{Deserialize, Serialize};

use super::{Action, Direction};

/// One signal per closed bar per symbol, emitted after the virtual
/// position update for that bar has completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: Action,
    /// Regime label for the bar, 0..n_states.
    pub hmm_state: usize,
    /// Virtual position floating PnL at emission.
    pub virtual_pnl: f64,
    /// Unix timestamp (seconds UTC) of emission.
    pub timestamp: i64,
}

impl Signal {
    /// Direction projection of the action.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.action.direction()
    }

    /// Intensity projection of the action.
    #[must_use]
    pub const fn intensity(&self) -> u8 {
        self.action.intensity()
    }

    /// True when the signal asks for a position.
    #[must_use]
    pub const fn is_entry(&self) -> bool {
        !matches!(self.action.direction(), Direction::Flat)
    }
}
