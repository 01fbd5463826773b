//! Market data types: ticks, closed bars, timeframes.

use serde::{Deserialize, Serialize};

/// Supported bar durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Bar duration in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1800,
            Self::H1 => 3600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }

    /// Parse from the conventional short name ("M15", "H1", ...).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "M1" => Some(Self::M1),
            "M5" => Some(Self::M5),
            "M15" => Some(Self::M15),
            "M30" => Some(Self::M30),
            "H1" => Some(Self::H1),
            "H4" => Some(Self::H4),
            "D1" => Some(Self::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
            Self::D1 => "D1",
        };
        write!(f, "{name}")
    }
}

/// A single market tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Symbol name.
    pub symbol: String,
    /// Unix timestamp, seconds UTC.
    pub time: i64,
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
}

impl Tick {
    /// Mid price used for bar construction.
    #[must_use]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// An immutable closed OHLCV bar.
///
/// `time` is the bar's aligned start timestamp: `time % timeframe == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    /// Unix timestamp, seconds UTC, aligned to the timeframe grid.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_seconds() {
        assert_eq!(Timeframe::M15.seconds(), 900);
        assert_eq!(Timeframe::D1.seconds(), 86_400);
    }

    #[test]
    fn test_timeframe_parse_round_trip() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ] {
            assert_eq!(Timeframe::parse(&tf.to_string()), Some(tf));
        }
        assert_eq!(Timeframe::parse("M2"), None);
    }

    #[test]
    fn test_tick_mid() {
        let tick = Tick {
            symbol: "EURUSD".to_string(),
            time: 0,
            bid: 1.1000,
            ask: 1.1002,
        };
        assert!((tick.mid() - 1.1001).abs() < 1e-12);
    }
}
