//! Per-symbol executor configuration.
//!
//! A single JSON document maps symbol names to execution parameters; a
//! reserved `_risk` entry carries the risk guard parameters. Keys
//! starting with `_` are otherwise ignored. Changes take effect on the
//! next process start; there is no hot reload.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::risk::RiskConfig;

use super::ConfigError;

/// Execution parameters for one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SymbolConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_lot_weak")]
    pub lot_weak: f64,
    #[serde(default = "default_lot_moderate")]
    pub lot_moderate: f64,
    #[serde(default = "default_lot_strong")]
    pub lot_strong: f64,
    /// Stop loss distance in account currency; 0 disables.
    #[serde(default = "default_sl_usd")]
    pub sl_usd: f64,
    /// Take profit distance in account currency; 0 disables.
    #[serde(default)]
    pub tp_usd: f64,
    #[serde(default = "default_max_spread")]
    pub max_spread_pips: f64,
}

const fn default_enabled() -> bool {
    true
}
fn default_lot_weak() -> f64 {
    0.01
}
fn default_lot_moderate() -> f64 {
    0.03
}
fn default_lot_strong() -> f64 {
    0.05
}
fn default_sl_usd() -> f64 {
    10.0
}
fn default_max_spread() -> f64 {
    2.0
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            lot_weak: default_lot_weak(),
            lot_moderate: default_lot_moderate(),
            lot_strong: default_lot_strong(),
            sl_usd: default_sl_usd(),
            tp_usd: 0.0,
            max_spread_pips: default_max_spread(),
        }
    }
}

impl SymbolConfig {
    /// Lot for a signal intensity; 0 for wait or unmapped intensities.
    #[must_use]
    pub fn lot_for(&self, intensity: u8) -> f64 {
        match intensity {
            1 => self.lot_weak,
            2 => self.lot_moderate,
            3 => self.lot_strong,
            _ => 0.0,
        }
    }
}

/// Parsed symbol configuration file.
#[derive(Debug, Clone, Default)]
pub struct SymbolFile {
    pub symbols: HashMap<String, SymbolConfig>,
    pub risk: RiskConfig,
}

/// Load the executor's per-symbol configuration.
///
/// # Errors
///
/// [`ConfigError`] on unreadable file, malformed JSON, or invalid
/// per-symbol values.
pub fn load_symbol_file(path: &Path) -> Result<SymbolFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_symbol_file(&raw)
}

fn parse_symbol_file(raw: &str) -> Result<SymbolFile, ConfigError> {
    let document: HashMap<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let mut file = SymbolFile::default();
    for (key, value) in document {
        if key == "_risk" {
            file.risk = serde_json::from_value(value)
                .map_err(|e| ConfigError::Invalid(format!("_risk: {e}")))?;
            continue;
        }
        if key.starts_with('_') {
            continue;
        }
        let config: SymbolConfig = serde_json::from_value(value)
            .map_err(|e| ConfigError::Invalid(format!("{key}: {e}")))?;
        validate_symbol(&key, &config)?;
        file.symbols.insert(key, config);
    }
    Ok(file)
}

fn validate_symbol(symbol: &str, config: &SymbolConfig) -> Result<(), ConfigError> {
    for (name, lot) in [
        ("lot_weak", config.lot_weak),
        ("lot_moderate", config.lot_moderate),
        ("lot_strong", config.lot_strong),
    ] {
        if lot < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: format!("{symbol}.{name}"),
                message: "lot must not be negative".to_string(),
            });
        }
    }
    if config.sl_usd < 0.0 || config.tp_usd < 0.0 {
        return Err(ConfigError::OutOfRange {
            field: format!("{symbol}.sl_usd/tp_usd"),
            message: "stop distances must not be negative".to_string(),
        });
    }
    if config.max_spread_pips <= 0.0 {
        return Err(ConfigError::OutOfRange {
            field: format!("{symbol}.max_spread_pips"),
            message: "must be positive".to_string(),
        });
    }
    Ok(())
}
