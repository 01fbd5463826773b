//! USD-denominated stop distances to absolute price levels.
//!
//! The broker API takes stops as absolute prices. Sending a USD figure
//! unconverted would be interpreted as a price level and produce wildly
//! wrong stops, so this conversion is mandatory on every open:
//!
//! ```text
//! distance_pips = usd / (pip_value_per_lot * volume)
//! level         = entry ± distance_pips * pip_size
//! ```
//!
//! Pip value comes from broker symbol metadata when available, else
//! from a static table of well-known majors. Anything else refuses the
//! conversion with `UnknownPipValue` — a guessed pip value means a
//! guessed stop.

use thiserror::Error;

use crate::models::SymbolInfo;

/// Conversion failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// No pip value from the broker and no fallback entry.
    #[error("unknown pip value for {0}")]
    UnknownPipValue(String),

    /// Volume must be positive to spread the USD distance over.
    #[error("invalid volume {0}")]
    InvalidVolume(String),
}

/// Absolute stop/target prices; 0 means "not set".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StopLevels {
    pub sl: f64,
    pub tp: f64,
}

/// Fallback pip values per standard lot for a USD-denominated account.
/// Quote-USD pairs are exactly 10; the rest are conservative snapshots.
const FALLBACK_PIP_VALUES: &[(&str, f64)] = &[
    ("EURUSD", 10.0),
    ("GBPUSD", 10.0),
    ("AUDUSD", 10.0),
    ("NZDUSD", 10.0),
    ("USDJPY", 6.7),
    ("USDCHF", 10.5),
    ("USDCAD", 7.3),
    ("EURJPY", 6.7),
    ("GBPJPY", 6.7),
    ("EURGBP", 12.5),
    ("AUDJPY", 6.7),
    ("NZDJPY", 6.7),
    ("CADJPY", 6.7),
    ("EURCHF", 10.5),
    ("EURCAD", 7.3),
    ("GBPCHF", 10.5),
];

/// Stateless converter.
#[derive(Debug, Default)]
pub struct PriceConverter;

impl PriceConverter {
    /// Compute SL and TP prices for an entry.
    ///
    /// `direction` is +1 long / -1 short; `sl_usd`/`tp_usd` of 0 leave
    /// that side unset. Prices are rounded to the symbol's precision.
    ///
    /// # Errors
    ///
    /// [`ConvertError::UnknownPipValue`] when no pip value is known,
    /// [`ConvertError::InvalidVolume`] for non-positive volume — but
    /// only when at least one side is actually requested.
    pub fn stop_levels(
        symbol: &str,
        direction: i8,
        entry: f64,
        volume: f64,
        sl_usd: f64,
        tp_usd: f64,
        info: Option<&SymbolInfo>,
    ) -> Result<StopLevels, ConvertError> {
        let mut levels = StopLevels::default();
        if sl_usd <= 0.0 && tp_usd <= 0.0 {
            return Ok(levels);
        }
        if volume <= 0.0 {
            return Err(ConvertError::InvalidVolume(format!("{volume}")));
        }

        let pip_value = pip_value_per_lot(symbol, info)
            .ok_or_else(|| ConvertError::UnknownPipValue(symbol.to_string()))?;
        let digits = digits_for(symbol, info);
        let pip_size = pip_size_for(symbol, info);
        let sign = f64::from(direction.signum());

        if sl_usd > 0.0 {
            let distance = sl_usd / (pip_value * volume) * pip_size;
            levels.sl = round_to(entry - sign * distance, digits);
        }
        if tp_usd > 0.0 {
            let distance = tp_usd / (pip_value * volume) * pip_size;
            levels.tp = round_to(entry + sign * distance, digits);
        }
        Ok(levels)
    }

    /// Recover the USD distance a stop level represents (used by the
    /// round-trip property tests and drift reports).
    #[must_use]
    pub fn level_to_usd(
        symbol: &str,
        entry: f64,
        level: f64,
        volume: f64,
        info: Option<&SymbolInfo>,
    ) -> Option<f64> {
        let pip_value = pip_value_per_lot(symbol, info)?;
        let pip_size = pip_size_for(symbol, info);
        let distance_pips = (entry - level).abs() / pip_size;
        Some(distance_pips * pip_value * volume)
    }
}

fn pip_value_per_lot(symbol: &str, info: Option<&SymbolInfo>) -> Option<f64> {
    if let Some(value) = info.and_then(|i| i.pip_value_per_lot) {
        if value > 0.0 {
            return Some(value);
        }
    }
    FALLBACK_PIP_VALUES
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|(_, value)| *value)
}

fn digits_for(symbol: &str, info: Option<&SymbolInfo>) -> u32 {
    if let Some(info) = info {
        return info.digits;
    }
    if symbol.contains("JPY") {
        3
    } else {
        5
    }
}

fn pip_size_for(symbol: &str, info: Option<&SymbolInfo>) -> f64 {
    if let Some(info) = info {
        return info.pip_size();
    }
    // JPY-quoted pairs price with 3 digits: 1 pip = 0.01.
    if symbol.contains("JPY") {
        0.01
    } else {
        0.0001
    }
}

fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(digits).unwrap_or(5));
    (value * factor).round() / factor
}
