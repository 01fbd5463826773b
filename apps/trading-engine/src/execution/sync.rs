//! Synchronization state machine: real position versus model signal.
//!
//! Decision table:
//!
//! | Real      | Signal          | Decision  |
//! |-----------|-----------------|-----------|
//! | flat      | 0               | Noop      |
//! | flat      | ±1              | WaitSync  |
//! | direction | same direction  | Noop      |
//! | direction | 0               | Close     |
//! | direction | opposite        | Close     |
//!
//! Opens happen only through the edge flag inside the WaitSync path
//! (the missed-entry rule): when the broker is flat but the model is
//! holding, entering mid-move is refused; a fresh entry is permitted
//! only on a bar whose signal direction differs from the previous
//! bar's. The latched direction starts unknown, so the first live bar
//! after startup can never open — warmup may have put the model into a
//! position long ago.

use serde::Serialize;

/// What the executor should do this bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Real and virtual agree; nothing to do.
    Noop,
    /// Close the real position at market.
    Close,
    /// Broker flat, model holding: defer to the edge rule.
    WaitSync,
}

/// Decision plus the edge flag for WaitSync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub decision: Decision,
    /// True only on a WaitSync bar whose direction is a fresh edge.
    pub should_open: bool,
}

/// Per-symbol sync state, owned by the executor.
#[derive(Debug, Default)]
pub struct SyncState {
    waiting_sync: bool,
    /// Signal direction of the previous processed bar; `None` until the
    /// first bar is seen.
    last_signal_direction: Option<i8>,
}

impl SyncState {
    /// Fresh state: nothing latched.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a missed entry is latched.
    #[must_use]
    pub const fn waiting_sync(&self) -> bool {
        self.waiting_sync
    }

    /// Latched direction of the last processed signal.
    #[must_use]
    pub const fn last_signal_direction(&self) -> Option<i8> {
        self.last_signal_direction
    }

    /// Evaluate one bar. `real_direction` is 0 when the broker is flat.
    pub fn evaluate(&mut self, real_direction: i8, signal_direction: i8) -> SyncOutcome {
        let outcome = match (real_direction, signal_direction) {
            (0, 0) => {
                self.waiting_sync = false;
                SyncOutcome {
                    decision: Decision::Noop,
                    should_open: false,
                }
            }
            (0, signal) => {
                let edge = match self.last_signal_direction {
                    // First observed signal: treat as mid-move.
                    None => false,
                    Some(previous) => signal != previous,
                };
                self.waiting_sync = !edge;
                SyncOutcome {
                    decision: Decision::WaitSync,
                    should_open: edge,
                }
            }
            (real, signal) if real == signal => {
                self.waiting_sync = false;
                SyncOutcome {
                    decision: Decision::Noop,
                    should_open: false,
                }
            }
            // Signal flat or opposite while holding: close. A reopen
            // after an inversion is deferred to the next bar's edge
            // evaluation, never done back-to-back in the same bar.
            _ => {
                self.waiting_sync = false;
                SyncOutcome {
                    decision: Decision::Close,
                    should_open: false,
                }
            }
        };
        self.last_signal_direction = Some(signal_direction);
        outcome
    }

    /// Forget everything (used when a symbol is reconfigured).
    pub fn reset(&mut self) {
        self.waiting_sync = false;
        self.last_signal_direction = None;
    }
}
