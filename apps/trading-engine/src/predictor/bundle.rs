//! Model bundle loading.
//!
//! One archive per `(symbol, timeframe)` pair:
//!
//! ```text
//! {symbol}_{timeframe}.zip
//!   ├── {symbol}_{timeframe}_hmm.json      regime model weights
//!   └── {symbol}_{timeframe}_policy.json   policy network weights
//! ```
//!
//! The metadata record lives in the archive's comment field as JSON and
//! carries everything the runtime needs that was frozen at training
//! time: cost parameters, indicator periods, the action table, and data
//! provenance. Unknown format versions and missing fields fail loudly;
//! a symbol whose bundle does not load is skipped, the rest continue.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use zip::ZipArchive;

use crate::models::Timeframe;

use super::features::FeatureParams;
use super::virtual_position::TrainingCosts;

/// Format versions this loader understands.
const SUPPORTED_VERSIONS: &[&str] = &["2.0"];

/// Bundle loading failure.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("archive unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive corrupted: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive has no metadata comment")]
    MetadataMissing,

    #[error("metadata invalid: {0}")]
    MetadataInvalid(String),

    #[error("unsupported format version {0} (supported: {SUPPORTED_VERSIONS:?})")]
    UnsupportedVersion(String),

    #[error("archive entry missing: {0}")]
    EntryMissing(String),

    #[error("model weights invalid: {0}")]
    WeightsInvalid(String),

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),
}

/// Symbol descriptor from the metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolDescriptor {
    pub name: String,
    pub timeframe: String,
}

/// Training configuration: execution costs plus run provenance.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(flatten)]
    pub costs: TrainingCosts,
    #[serde(default)]
    pub initial_balance: f64,
    #[serde(default)]
    pub total_timesteps: u64,
}

/// Regime model hyperparameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HmmConfig {
    #[serde(default = "default_n_states")]
    pub n_states: usize,
    #[serde(default = "default_momentum_period")]
    pub momentum_period: usize,
    #[serde(default = "default_consistency_period")]
    pub consistency_period: usize,
    #[serde(default = "default_range_period")]
    pub range_period: usize,
}

/// Policy feature hyperparameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RlConfig {
    #[serde(default = "default_roc_period")]
    pub roc_period: usize,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    #[serde(default = "default_range_period")]
    pub range_period: usize,
    #[serde(default = "default_volume_ma_period")]
    pub volume_ma_period: usize,
}

fn default_n_states() -> usize {
    5
}
fn default_momentum_period() -> usize {
    12
}
fn default_consistency_period() -> usize {
    12
}
fn default_range_period() -> usize {
    20
}
fn default_roc_period() -> usize {
    10
}
fn default_atr_period() -> usize {
    14
}
fn default_ema_period() -> usize {
    200
}
fn default_volume_ma_period() -> usize {
    20
}

/// One row of the action index table.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub direction: i8,
    pub intensity: u8,
}

/// Regime state analysis: which states the training run labelled as
/// bullish, bearish, or ranging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateAnalysis {
    #[serde(default)]
    pub bull_states: Vec<usize>,
    #[serde(default)]
    pub bear_states: Vec<usize>,
    #[serde(default)]
    pub range_states: Vec<usize>,
}

/// Data provenance: date range and bar counts per split.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataInfo {
    #[serde(default)]
    pub date_start: String,
    #[serde(default)]
    pub date_end: String,
    #[serde(default)]
    pub bars: HashMap<String, u64>,
}

/// Full metadata record from the archive comment.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleMetadata {
    pub format_version: String,
    pub symbol: SymbolDescriptor,
    pub training_config: TrainingConfig,
    pub hmm_config: HmmConfig,
    pub rl_config: RlConfig,
    pub actions: HashMap<String, ActionSpec>,
    #[serde(default)]
    pub state_analysis: StateAnalysis,
    #[serde(default)]
    pub data_info: DataInfo,
    /// Optional override of the prediction buffer size.
    #[serde(default)]
    pub min_bars: Option<usize>,
}

impl BundleMetadata {
    /// Feature periods combined from the HMM and policy configs.
    #[must_use]
    pub fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            momentum_period: self.hmm_config.momentum_period,
            consistency_period: self.hmm_config.consistency_period,
            hmm_range_period: self.hmm_config.range_period,
            roc_period: self.rl_config.roc_period,
            atr_period: self.rl_config.atr_period,
            ema_period: self.rl_config.ema_period,
            range_period: self.rl_config.range_period,
            volume_ma_period: self.rl_config.volume_ma_period,
            n_states: self.hmm_config.n_states,
        }
    }
}

/// Gaussian-emission regime model.
///
/// For a single observation the most likely state is the argmax of the
/// start distribution's log-probability plus the diagonal-Gaussian
/// log-likelihood, which is what the training library computes for a
/// one-step decode.
#[derive(Debug, Clone, Deserialize)]
pub struct RegimeModel {
    pub start_prob: Vec<f64>,
    /// Per-state feature means, `n_states x 3`.
    pub means: Vec<Vec<f64>>,
    /// Per-state diagonal variances, `n_states x 3`.
    pub variances: Vec<Vec<f64>>,
}

impl RegimeModel {
    /// Number of regime states.
    #[must_use]
    pub fn n_states(&self) -> usize {
        self.start_prob.len()
    }

    fn validate(&self, n_states: usize) -> Result<(), ModelError> {
        if self.start_prob.len() != n_states
            || self.means.len() != n_states
            || self.variances.len() != n_states
        {
            return Err(ModelError::WeightsInvalid(format!(
                "regime model has {} states, metadata says {n_states}",
                self.start_prob.len()
            )));
        }
        for (means, variances) in self.means.iter().zip(&self.variances) {
            if means.len() != 3 || variances.len() != 3 {
                return Err(ModelError::WeightsInvalid(
                    "regime model emission dimension must be 3".to_string(),
                ));
            }
            if variances.iter().any(|&v| v <= 0.0) {
                return Err(ModelError::WeightsInvalid(
                    "regime model variance must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Most likely state for one observation.
    #[must_use]
    pub fn predict(&self, features: &[f64; 3]) -> usize {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for state in 0..self.n_states() {
            let mut score = self.start_prob[state].max(f64::MIN_POSITIVE).ln();
            for d in 0..3 {
                let mean = self.means[state][d];
                let var = self.variances[state][d];
                let diff = features[d] - mean;
                score -= 0.5 * (diff * diff / var + (2.0 * std::f64::consts::PI * var).ln());
            }
            if score > best_score {
                best_score = score;
                best = state;
            }
        }
        best
    }
}

/// Layer activation of the policy network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Tanh,
    Relu,
    Linear,
}

/// One dense layer: `output = activation(weights * input + bias)`.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyLayer {
    /// Row-major, `out x in`.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub activation: Activation,
}

/// Feed-forward policy head. Deterministic inference takes the argmax
/// over the final logits.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyModel {
    pub layers: Vec<PolicyLayer>,
}

impl PolicyModel {
    fn validate(&self, input_len: usize, n_actions: usize) -> Result<(), ModelError> {
        let mut width = input_len;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != layer.bias.len() {
                return Err(ModelError::WeightsInvalid(format!(
                    "layer {i}: {} rows vs {} biases",
                    layer.weights.len(),
                    layer.bias.len()
                )));
            }
            for row in &layer.weights {
                if row.len() != width {
                    return Err(ModelError::WeightsInvalid(format!(
                        "layer {i}: expected input width {width}, found {}",
                        row.len()
                    )));
                }
            }
            width = layer.bias.len();
        }
        if width != n_actions {
            return Err(ModelError::WeightsInvalid(format!(
                "policy head emits {width} logits, expected {n_actions}"
            )));
        }
        Ok(())
    }

    /// Deterministic action index for a feature vector.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> usize {
        let mut activations: Vec<f64> = features.to_vec();
        for layer in &self.layers {
            let mut next = Vec::with_capacity(layer.bias.len());
            for (row, bias) in layer.weights.iter().zip(&layer.bias) {
                let mut sum = *bias;
                for (w, x) in row.iter().zip(&activations) {
                    sum += w * x;
                }
                next.push(match layer.activation {
                    Activation::Tanh => sum.tanh(),
                    Activation::Relu => sum.max(0.0),
                    Activation::Linear => sum,
                });
            }
            activations = next;
        }
        argmax(&activations)
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best_value = v;
            best = i;
        }
    }
    best
}

/// A loaded model bundle: metadata plus both inference models.
#[derive(Debug)]
pub struct ModelBundle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub metadata: BundleMetadata,
    hmm: RegimeModel,
    policy: PolicyModel,
}

impl ModelBundle {
    /// Load and validate a bundle archive.
    ///
    /// # Errors
    ///
    /// Any structural problem — unreadable archive, missing or invalid
    /// metadata, unsupported version, missing entries, malformed weights.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let comment = archive.comment();
        if comment.is_empty() {
            return Err(ModelError::MetadataMissing);
        }
        let metadata: BundleMetadata = serde_json::from_slice(comment)
            .map_err(|e| ModelError::MetadataInvalid(e.to_string()))?;

        if !SUPPORTED_VERSIONS.contains(&metadata.format_version.as_str()) {
            return Err(ModelError::UnsupportedVersion(
                metadata.format_version.clone(),
            ));
        }

        let symbol = metadata.symbol.name.clone();
        let timeframe = Timeframe::parse(&metadata.symbol.timeframe)
            .ok_or_else(|| ModelError::UnknownTimeframe(metadata.symbol.timeframe.clone()))?;

        let prefix = format!("{symbol}_{}", metadata.symbol.timeframe);
        let hmm: RegimeModel = read_entry(&mut archive, &format!("{prefix}_hmm.json"))?;
        let policy: PolicyModel = read_entry(&mut archive, &format!("{prefix}_policy.json"))?;

        hmm.validate(metadata.hmm_config.n_states)?;
        policy.validate(metadata.feature_params().policy_len(), 7)?;

        info!(
            symbol = %symbol,
            timeframe = %timeframe,
            version = %metadata.format_version,
            n_states = metadata.hmm_config.n_states,
            "model bundle loaded"
        );

        Ok(Self {
            symbol,
            timeframe,
            metadata,
            hmm,
            policy,
        })
    }

    /// Load only the metadata, without deserializing model weights.
    ///
    /// # Errors
    ///
    /// Same structural errors as [`ModelBundle::load`], minus weight
    /// validation.
    pub fn load_metadata(path: &Path) -> Result<BundleMetadata, ModelError> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(file)?;
        let comment = archive.comment();
        if comment.is_empty() {
            return Err(ModelError::MetadataMissing);
        }
        serde_json::from_slice(comment).map_err(|e| ModelError::MetadataInvalid(e.to_string()))
    }

    /// Regime state for one feature triple.
    #[must_use]
    pub fn hmm_predict(&self, features: &[f64; 3]) -> usize {
        self.hmm.predict(features)
    }

    /// Deterministic policy action index for a feature vector.
    #[must_use]
    pub fn policy_predict(&self, features: &[f64]) -> usize {
        self.policy.predict(features)
    }
}

fn read_entry<T: serde::de::DeserializeOwned>(
    archive: &mut ZipArchive<File>,
    name: &str,
) -> Result<T, ModelError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| ModelError::EntryMissing(name.to_string()))?;
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents)?;
    serde_json::from_slice(&contents)
        .map_err(|e| ModelError::WeightsInvalid(format!("{name}: {e}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders for synthetic bundles used across the test suite.

    use std::io::Write;
    use std::path::Path;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Metadata JSON for a 2-state test model on the given symbol.
    #[must_use]
    pub fn metadata_json(symbol: &str, timeframe: &str) -> serde_json::Value {
        serde_json::json!({
            "format_version": "2.0",
            "symbol": {"name": symbol, "timeframe": timeframe},
            "training_config": {
                "point": 0.00001,
                "pip_value": 10.0,
                "spread_points": 7.0,
                "slippage_points": 2.0,
                "commission_per_lot": 7.0,
                "digits": 5,
                "lot_sizes": [0.0, 0.01, 0.03, 0.05],
                "initial_balance": 10000.0,
                "total_timesteps": 500000
            },
            "hmm_config": {
                "n_states": 2,
                "momentum_period": 3,
                "consistency_period": 3,
                "range_period": 4
            },
            "rl_config": {
                "roc_period": 2,
                "atr_period": 3,
                "ema_period": 5,
                "range_period": 4,
                "volume_ma_period": 3
            },
            "actions": {
                "0": {"name": "WAIT", "direction": 0, "intensity": 0},
                "1": {"name": "LONG_WEAK", "direction": 1, "intensity": 1},
                "2": {"name": "LONG_MODERATE", "direction": 1, "intensity": 2},
                "3": {"name": "LONG_STRONG", "direction": 1, "intensity": 3},
                "4": {"name": "SHORT_WEAK", "direction": -1, "intensity": 1},
                "5": {"name": "SHORT_MODERATE", "direction": -1, "intensity": 2},
                "6": {"name": "SHORT_STRONG", "direction": -1, "intensity": 3}
            },
            "state_analysis": {"bull_states": [0], "bear_states": [1], "range_states": []},
            "data_info": {
                "date_start": "2023-01-01",
                "date_end": "2024-12-31",
                "bars": {"train": 60000, "val": 10000, "test": 10000}
            }
        })
    }

    /// Regime weights whose state 0 fires on positive momentum and
    /// state 1 on negative momentum.
    #[must_use]
    pub fn hmm_json() -> serde_json::Value {
        serde_json::json!({
            "start_prob": [0.5, 0.5],
            "means": [[1.0, 0.5, 0.5], [-1.0, -0.5, -0.5]],
            "variances": [[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]
        })
    }

    /// A single linear layer policy. `logit_weights[action][feature]`.
    #[must_use]
    pub fn policy_json(input_len: usize, favored_action: usize) -> serde_json::Value {
        let mut weights = vec![vec![0.0; input_len]; 7];
        let mut bias = vec![0.0; 7];
        bias[favored_action] = 1.0;
        // Give the favored action a slight sensitivity to the first
        // market feature so the network is not fully degenerate.
        weights[favored_action][0] = 0.1;
        serde_json::json!({
            "layers": [{
                "weights": weights,
                "bias": bias,
                "activation": "linear"
            }]
        })
    }

    /// Write a complete archive to `path`.
    pub fn write_bundle(
        path: &Path,
        symbol: &str,
        timeframe: &str,
        metadata: &serde_json::Value,
        hmm: &serde_json::Value,
        policy: &serde_json::Value,
    ) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        writer
            .start_file(format!("{symbol}_{timeframe}_hmm.json"), options)
            .unwrap();
        writer
            .write_all(serde_json::to_vec(hmm).unwrap().as_slice())
            .unwrap();

        writer
            .start_file(format!("{symbol}_{timeframe}_policy.json"), options)
            .unwrap();
        writer
            .write_all(serde_json::to_vec(policy).unwrap().as_slice())
            .unwrap();

        writer.set_comment(serde_json::to_string(metadata).unwrap());
        writer.finish().unwrap();
    }
}
