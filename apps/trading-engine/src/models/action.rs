//! The policy's closed action space and its derived projections.
//!
//! Seven discrete actions: index 0 stays flat, 1-3 are long with rising
//! intensity, 4-6 are short with rising intensity. Direction and intensity
//! are total functions of the action, checked at compile time through the
//! exhaustive matches below.

use serde::{Deserialize, Serialize};

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Short position.
    Short,
    /// No position.
    Flat,
    /// Long position.
    Long,
}

impl Direction {
    /// Signed integer form: -1, 0, +1.
    #[must_use]
    pub const fn value(self) -> i8 {
        match self {
            Self::Short => -1,
            Self::Flat => 0,
            Self::Long => 1,
        }
    }

    /// Build from a signed integer; any positive value is long, any
    /// negative value is short.
    #[must_use]
    pub const fn from_value(value: i8) -> Self {
        match value {
            v if v > 0 => Self::Long,
            v if v < 0 => Self::Short,
            _ => Self::Flat,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short => write!(f, "SHORT"),
            Self::Flat => write!(f, "FLAT"),
            Self::Long => write!(f, "LONG"),
        }
    }
}

/// Discrete policy action (7 variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Stay out of the market.
    Wait,
    /// Long, weak conviction.
    LongWeak,
    /// Long, moderate conviction.
    LongModerate,
    /// Long, strong conviction.
    LongStrong,
    /// Short, weak conviction.
    ShortWeak,
    /// Short, moderate conviction.
    ShortModerate,
    /// Short, strong conviction.
    ShortStrong,
}

impl Action {
    /// All actions in policy index order.
    pub const ALL: [Self; 7] = [
        Self::Wait,
        Self::LongWeak,
        Self::LongModerate,
        Self::LongStrong,
        Self::ShortWeak,
        Self::ShortModerate,
        Self::ShortStrong,
    ];

    /// Map a policy output index to an action.
    ///
    /// Out-of-range indices map to `Wait` rather than panicking; the
    /// policy head is trained on exactly seven logits, so anything else
    /// indicates a corrupt bundle and staying flat is the safe output.
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        match index {
            1 => Self::LongWeak,
            2 => Self::LongModerate,
            3 => Self::LongStrong,
            4 => Self::ShortWeak,
            5 => Self::ShortModerate,
            6 => Self::ShortStrong,
            _ => Self::Wait,
        }
    }

    /// Policy index of this action (0-6).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Wait => 0,
            Self::LongWeak => 1,
            Self::LongModerate => 2,
            Self::LongStrong => 3,
            Self::ShortWeak => 4,
            Self::ShortModerate => 5,
            Self::ShortStrong => 6,
        }
    }

    /// Direction projection.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Wait => Direction::Flat,
            Self::LongWeak | Self::LongModerate | Self::LongStrong => Direction::Long,
            Self::ShortWeak | Self::ShortModerate | Self::ShortStrong => Direction::Short,
        }
    }

    /// Intensity projection: 0 (wait), 1 (weak), 2 (moderate), 3 (strong).
    #[must_use]
    pub const fn intensity(self) -> u8 {
        match self {
            Self::Wait => 0,
            Self::LongWeak | Self::ShortWeak => 1,
            Self::LongModerate | Self::ShortModerate => 2,
            Self::LongStrong | Self::ShortStrong => 3,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Wait => "WAIT",
            Self::LongWeak => "LONG_WEAK",
            Self::LongModerate => "LONG_MODERATE",
            Self::LongStrong => "LONG_STRONG",
            Self::ShortWeak => "SHORT_WEAK",
            Self::ShortModerate => "SHORT_MODERATE",
            Self::ShortStrong => "SHORT_STRONG",
        };
        write!(f, "{name}")
    }
}
