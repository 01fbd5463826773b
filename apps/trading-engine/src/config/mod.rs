//! Configuration loading and validation.
//!
//! The main configuration is a JSON document with sections (`broker`,
//! `paths`, `trading`, `persistence`, `logging`, `health`). String
//! values support `${ENV_VAR}` and `${ENV_VAR:default}` references,
//! expanded from the process environment at load time. Invalid
//! configuration is fatal at startup (exit code 2).

mod symbols;

pub use symbols::{load_symbol_file, SymbolConfig, SymbolFile};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::broker::real::RealBrokerConfig;
use crate::models::Timeframe;

/// Configuration failure: fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config invalid: {0}")]
    Invalid(String),

    #[error("config field out of range: {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Broker selection: the real bridged connector or the in-memory mock.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerSection {
    /// Production connector; carries address and credentials.
    Real(RealBrokerConfig),
    /// In-memory mock, for development and tests.
    Mock,
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// Directory scanned for model bundle archives.
    pub models_dir: PathBuf,
    /// Per-symbol executor configuration file.
    pub executor_config: PathBuf,
    /// Log directory; empty disables file logging.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Trading behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingSection {
    /// Bar timeframe short name ("M15").
    pub timeframe: String,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    /// Bars fetched for warmup fast-forward.
    #[serde(default = "default_warmup_bars")]
    pub warmup_bars: usize,
    #[serde(default)]
    pub close_on_exit: bool,
    #[serde(default)]
    pub close_on_day_change: bool,
}

fn default_initial_balance() -> f64 {
    10_000.0
}
const fn default_warmup_bars() -> usize {
    1000
}

/// Telemetry egress.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
}

/// Logging output.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file name inside `paths.log_dir`; empty disables.
    #[serde(default)]
    pub file: Option<String>,
    /// `daily` or `never`.
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            rotation: default_rotation(),
        }
    }
}

/// Health monitoring thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_s: u64,
    /// Per-symbol silence tolerated before the symbol is unhealthy.
    #[serde(default = "default_symbol_timeout")]
    pub symbol_timeout_s: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
}

const fn default_heartbeat_interval() -> u64 {
    5
}
const fn default_symbol_timeout() -> u64 {
    300
}
const fn default_memory_limit() -> u64 {
    1000
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: default_heartbeat_interval(),
            symbol_timeout_s: default_symbol_timeout(),
            memory_limit_mb: default_memory_limit(),
        }
    }
}

/// The full main configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub broker: BrokerSection,
    pub paths: PathsSection,
    pub trading: TradingSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub health: HealthSection,
}

impl Config {
    /// Load, expand environment references, parse and validate.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on unreadable file, parse failure, or failed
    /// validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str_expanded(&raw, &env_snapshot())
    }

    /// Parse from a string with the given environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on parse failure or failed validation.
    pub fn from_str_expanded(
        raw: &str,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let expanded = expand_env_refs(raw, env);
        let config: Self = serde_json::from_str(&expanded)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed trading timeframe.
    #[must_use]
    pub fn timeframe(&self) -> Timeframe {
        // Validated at load; fall back defensively anyway.
        Timeframe::parse(&self.trading.timeframe).unwrap_or(Timeframe::M15)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if Timeframe::parse(&self.trading.timeframe).is_none() {
            return Err(ConfigError::OutOfRange {
                field: "trading.timeframe".to_string(),
                message: format!("unknown timeframe {:?}", self.trading.timeframe),
            });
        }
        if self.trading.initial_balance <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "trading.initial_balance".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.trading.warmup_bars == 0 {
            return Err(ConfigError::OutOfRange {
                field: "trading.warmup_bars".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.persistence.enabled && self.persistence.endpoint.is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "persistence.endpoint".to_string(),
                message: "required when persistence is enabled".to_string(),
            });
        }
        if let BrokerSection::Real(real) = &self.broker {
            if real.address.is_empty() {
                return Err(ConfigError::OutOfRange {
                    field: "broker.address".to_string(),
                    message: "required for the real broker".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn env_snapshot() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Expand `${VAR}` and `${VAR:default}` references. Unknown variables
/// without a default are left verbatim so validation reports them in
/// context.
fn expand_env_refs(raw: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
            Some(end) => {
                let reference = &after[..end];
                let (name, default) = match reference.split_once(':') {
                    Some((name, default)) => (name, Some(default)),
                    None => (reference, None),
                };
                match (env.get(name), default) {
                    (Some(value), _) => out.push_str(value),
                    (None, Some(default)) => out.push_str(default),
                    (None, None) => {
                        out.push_str("${");
                        out.push_str(reference);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(broker: &str) -> String {
        format!(
            r#"{{
                "broker": {broker},
                "paths": {{
                    "models_dir": "./models",
                    "executor_config": "./config/symbols.json"
                }},
                "trading": {{"timeframe": "M15"}}
            }}"#
        )
    }

    #[test]
    fn test_minimal_mock_config_parses() {
        let config =
            Config::from_str_expanded(&minimal_config(r#"{"type": "mock"}"#), &HashMap::new())
                .unwrap();
        assert!(matches!(config.broker, BrokerSection::Mock));
        assert_eq!(config.timeframe(), Timeframe::M15);
        assert_eq!(config.trading.warmup_bars, 1000);
        assert_eq!(config.health.symbol_timeout_s, 300);
    }

    #[test]
    fn test_real_broker_requires_address() {
        let broker = r#"{"type": "real", "address": "", "client_id": "a", "client_secret": "b"}"#;
        let err = Config::from_str_expanded(&minimal_config(broker), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field, .. } if field == "broker.address"));
    }

    #[test]
    fn test_invalid_timeframe_rejected() {
        let raw = minimal_config(r#"{"type": "mock"}"#).replace("M15", "M2");
        let err = Config::from_str_expanded(&raw, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field, .. } if field == "trading.timeframe"));
    }

    #[test]
    fn test_env_expansion() {
        let mut env = HashMap::new();
        env.insert("BROKER_SECRET".to_string(), "s3cret".to_string());

        assert_eq!(
            expand_env_refs("key=${BROKER_SECRET}", &env),
            "key=s3cret"
        );
        assert_eq!(
            expand_env_refs("host=${MISSING:localhost}", &env),
            "host=localhost"
        );
        // Unknown without default is left for validation to flag.
        assert_eq!(expand_env_refs("${MISSING}", &env), "${MISSING}");
        // Unterminated reference passes through untouched.
        assert_eq!(expand_env_refs("${OOPS", &env), "${OOPS");
    }

    #[test]
    fn test_persistence_enabled_requires_endpoint() {
        let raw = r#"{
            "broker": {"type": "mock"},
            "paths": {"models_dir": "m", "executor_config": "e"},
            "trading": {"timeframe": "M15"},
            "persistence": {"enabled": true}
        }"#;
        let err = Config::from_str_expanded(raw, &HashMap::new()).unwrap_err();
        assert!(
            matches!(err, ConfigError::OutOfRange { field, .. } if field == "persistence.endpoint")
        );
    }
}
