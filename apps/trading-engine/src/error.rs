//! Top-level fatal errors and their process exit codes.
//!
//! Exit codes: 0 clean shutdown, 1 fatal initialization error, 2
//! invalid configuration, 130 interrupt.

use thiserror::Error;

use crate::config::ConfigError;

/// Unrecoverable startup failure.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Configuration is missing, unreadable, or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A bootstrap step failed (broker connect, subscriptions, ...).
    #[error("initialization failed: {0}")]
    Init(String),
}

impl FatalError {
    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Init(_) => 1,
        }
    }
}

/// Exit code for an interrupt-initiated shutdown.
pub const EXIT_INTERRUPTED: i32 = 130;
