//! Pipeline configuration via TOML files.
//!
//! Every stage of the pipeline takes an explicit configuration struct instead
//! of reading process-wide constants, so several runs with different
//! hyperparameters can coexist. Defaults reproduce the reference experiment:
//! a 128-d extractor trained for 20 epochs at batch 256, a field model trained
//! for 200 epochs on 1024-row batches with 128-row perturbation sub-batches,
//! and a 100-step Euler pass with δ = 0.01.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Dataset location and augmentation parameters.
#[derive(Debug, Clone, Serialize)]
pub struct DataConfig {
    /// Directory holding the binary train/test batches.
    pub root: PathBuf,
    /// Zero-padding applied before the random crop on training images.
    pub augment_padding: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cifar-10"),
            augment_padding: 4,
        }
    }
}

/// Feature extractor topology.
///
/// The block structure is fixed (five conv blocks, two fc blocks, one
/// projection); widths are configurable so tests can run a narrow network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Input image channels.
    pub in_channels: usize,
    /// Output channels of the five convolutional blocks.
    pub conv_channels: [usize; 5],
    /// Width of the two fully-connected blocks.
    pub fc_dim: usize,
    /// Embedding dimension produced after L2 normalization.
    pub feat_dim: usize,
    /// Seed for weight initialization.
    pub seed: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            conv_channels: [96, 192, 384, 384, 192],
            fc_dim: 4096,
            feat_dim: 128,
            seed: 42,
        }
    }
}

/// Supervised extractor training hyperparameters.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractorTrainConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Seed for shuffling and augmentation noise.
    pub seed: u64,
}

impl Default for ExtractorTrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            epochs: 20,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

/// Field network topology. The input/output dimension is always
/// `feat_dim + 1` and is derived at construction time, never configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Number of hidden (linear + ReLU) layers before the output projection.
    pub hidden_layers: usize,
    /// Seed for weight initialization.
    pub seed: u64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            hidden_layers: 2,
            seed: 42,
        }
    }
}

/// Field training hyperparameters, including the perturbation constants.
#[derive(Debug, Clone, Serialize)]
pub struct FieldTrainConfig {
    /// Rows drawn per training batch; all of them act as attraction targets.
    pub large_batch: usize,
    /// Rows actually perturbed and fed through the model per batch.
    pub small_batch: usize,
    pub epochs: usize,
    /// Upper bound M of the uniform exponent distribution.
    pub m_max: f32,
    /// Additive floor Γ in the target normalization denominator.
    pub gamma: f32,
    /// Noise scale σ for both the z coordinate and the feature perturbation.
    pub sigma: f32,
    /// Geometric growth rate τ: perturbations scale with (1+τ)^m.
    pub tau: f32,
    pub learning_rate: f32,
    /// Seed for exponent and noise sampling.
    pub seed: u64,
}

impl Default for FieldTrainConfig {
    fn default() -> Self {
        Self {
            large_batch: 1024,
            small_batch: 128,
            epochs: 200,
            m_max: 20.0,
            gamma: 0.3,
            sigma: 0.01,
            tau: 0.03,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

/// Fixed-step Euler integration parameters.
#[derive(Debug, Clone, Serialize)]
pub struct OdeConfig {
    /// Step size δ.
    pub delta: f32,
    /// Number of Euler steps.
    pub steps: usize,
}

impl Default for OdeConfig {
    fn default() -> Self {
        Self {
            delta: 0.01,
            steps: 100,
        }
    }
}

/// Linear probe (softmax regression) fitting parameters.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    /// L2 penalty on the probe weights.
    pub l2: f32,
    pub seed: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.1,
            l2: 1e-4,
            seed: 42,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub extractor: ExtractorConfig,
    pub extractor_training: ExtractorTrainConfig,
    pub field: FieldConfig,
    pub field_training: FieldTrainConfig,
    pub ode: OdeConfig,
    pub probe: ProbeConfig,
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawPipelineConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let config = Self {
            data: DataConfig {
                root: PathBuf::from(raw.data.root),
                augment_padding: raw.data.augment_padding,
            },
            extractor: raw.extractor.validated()?,
            extractor_training: raw.extractor.training.validated()?,
            field: FieldConfig {
                hidden_layers: raw.field.hidden_layers,
                seed: raw.field.seed,
            },
            field_training: raw.field.training.validated()?,
            ode: raw.ode.validated()?,
            probe: raw.probe.validated()?,
        };

        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPipelineConfig {
    #[serde(default)]
    data: RawDataConfig,
    #[serde(default)]
    extractor: RawExtractorConfig,
    #[serde(default)]
    field: RawFieldConfig,
    #[serde(default)]
    ode: RawOdeConfig,
    #[serde(default)]
    probe: RawProbeConfig,
}

#[derive(Debug, Deserialize)]
struct RawDataConfig {
    #[serde(default = "default_root")]
    root: String,
    #[serde(default = "default_augment_padding")]
    augment_padding: usize,
}

impl Default for RawDataConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            augment_padding: default_augment_padding(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawExtractorConfig {
    #[serde(default = "default_in_channels")]
    in_channels: usize,
    #[serde(default = "default_conv_channels")]
    conv_channels: Vec<usize>,
    #[serde(default = "default_fc_dim")]
    fc_dim: usize,
    #[serde(default = "default_feat_dim")]
    feat_dim: usize,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default)]
    training: RawExtractorTraining,
}

impl Default for RawExtractorConfig {
    fn default() -> Self {
        Self {
            in_channels: default_in_channels(),
            conv_channels: default_conv_channels(),
            fc_dim: default_fc_dim(),
            feat_dim: default_feat_dim(),
            seed: default_seed(),
            training: RawExtractorTraining::default(),
        }
    }
}

impl RawExtractorConfig {
    fn validated(&self) -> Result<ExtractorConfig, ConfigError> {
        if self.in_channels == 0 {
            return Err(ConfigError::Parse(
                "extractor.in_channels must be ≥ 1".into(),
            ));
        }
        if self.feat_dim == 0 {
            return Err(ConfigError::Parse("extractor.feat_dim must be ≥ 1".into()));
        }
        if self.fc_dim == 0 {
            return Err(ConfigError::Parse("extractor.fc_dim must be ≥ 1".into()));
        }
        let conv_channels: [usize; 5] =
            self.conv_channels.clone().try_into().map_err(|_| {
                ConfigError::Parse("extractor.conv_channels must list exactly 5 widths".into())
            })?;
        if conv_channels.contains(&0) {
            return Err(ConfigError::Parse(
                "extractor.conv_channels must all be ≥ 1".into(),
            ));
        }

        Ok(ExtractorConfig {
            in_channels: self.in_channels,
            conv_channels,
            fc_dim: self.fc_dim,
            feat_dim: self.feat_dim,
            seed: self.seed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawExtractorTraining {
    #[serde(default = "default_extractor_batch")]
    batch_size: usize,
    #[serde(default = "default_extractor_epochs")]
    epochs: usize,
    #[serde(default = "default_learning_rate")]
    learning_rate: f32,
    #[serde(default = "default_seed")]
    seed: u64,
}

impl Default for RawExtractorTraining {
    fn default() -> Self {
        Self {
            batch_size: default_extractor_batch(),
            epochs: default_extractor_epochs(),
            learning_rate: default_learning_rate(),
            seed: default_seed(),
        }
    }
}

impl RawExtractorTraining {
    fn validated(&self) -> Result<ExtractorTrainConfig, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Parse(
                "extractor.training.batch_size must be ≥ 1".into(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::Parse(
                "extractor.training.learning_rate must be positive".into(),
            ));
        }

        Ok(ExtractorTrainConfig {
            batch_size: self.batch_size,
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            seed: self.seed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawFieldConfig {
    #[serde(default = "default_hidden_layers")]
    hidden_layers: usize,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default)]
    training: RawFieldTraining,
}

impl Default for RawFieldConfig {
    fn default() -> Self {
        Self {
            hidden_layers: default_hidden_layers(),
            seed: default_seed(),
            training: RawFieldTraining::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFieldTraining {
    #[serde(default = "default_large_batch")]
    large_batch: usize,
    #[serde(default = "default_small_batch")]
    small_batch: usize,
    #[serde(default = "default_field_epochs")]
    epochs: usize,
    #[serde(default = "default_m_max")]
    m_max: f32,
    #[serde(default = "default_gamma")]
    gamma: f32,
    #[serde(default = "default_sigma")]
    sigma: f32,
    #[serde(default = "default_tau")]
    tau: f32,
    #[serde(default = "default_learning_rate")]
    learning_rate: f32,
    #[serde(default = "default_seed")]
    seed: u64,
}

impl Default for RawFieldTraining {
    fn default() -> Self {
        Self {
            large_batch: default_large_batch(),
            small_batch: default_small_batch(),
            epochs: default_field_epochs(),
            m_max: default_m_max(),
            gamma: default_gamma(),
            sigma: default_sigma(),
            tau: default_tau(),
            learning_rate: default_learning_rate(),
            seed: default_seed(),
        }
    }
}

impl RawFieldTraining {
    fn validated(&self) -> Result<FieldTrainConfig, ConfigError> {
        if self.small_batch == 0 || self.large_batch == 0 {
            return Err(ConfigError::Parse(
                "field.training batch sizes must be ≥ 1".into(),
            ));
        }
        if self.small_batch > self.large_batch {
            return Err(ConfigError::Parse(
                "field.training.small_batch must not exceed large_batch".into(),
            ));
        }
        for (name, value) in [
            ("m_max", self.m_max),
            ("gamma", self.gamma),
            ("sigma", self.sigma),
            ("tau", self.tau),
            ("learning_rate", self.learning_rate),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Parse(format!(
                    "field.training.{name} must be positive"
                )));
            }
        }

        Ok(FieldTrainConfig {
            large_batch: self.large_batch,
            small_batch: self.small_batch,
            epochs: self.epochs,
            m_max: self.m_max,
            gamma: self.gamma,
            sigma: self.sigma,
            tau: self.tau,
            learning_rate: self.learning_rate,
            seed: self.seed,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawOdeConfig {
    #[serde(default = "default_delta")]
    delta: f32,
    #[serde(default = "default_steps")]
    steps: usize,
}

impl Default for RawOdeConfig {
    fn default() -> Self {
        Self {
            delta: default_delta(),
            steps: default_steps(),
        }
    }
}

impl RawOdeConfig {
    fn validated(&self) -> Result<OdeConfig, ConfigError> {
        if !self.delta.is_finite() || self.delta < 0.0 {
            return Err(ConfigError::Parse("ode.delta must be ≥ 0".into()));
        }

        Ok(OdeConfig {
            delta: self.delta,
            steps: self.steps,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawProbeConfig {
    #[serde(default = "default_probe_epochs")]
    epochs: usize,
    #[serde(default = "default_probe_learning_rate")]
    learning_rate: f32,
    #[serde(default = "default_probe_l2")]
    l2: f32,
    #[serde(default = "default_seed")]
    seed: u64,
}

impl Default for RawProbeConfig {
    fn default() -> Self {
        Self {
            epochs: default_probe_epochs(),
            learning_rate: default_probe_learning_rate(),
            l2: default_probe_l2(),
            seed: default_seed(),
        }
    }
}

impl RawProbeConfig {
    fn validated(&self) -> Result<ProbeConfig, ConfigError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::Parse(
                "probe.learning_rate must be positive".into(),
            ));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(ConfigError::Parse("probe.l2 must be ≥ 0".into()));
        }

        Ok(ProbeConfig {
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            l2: self.l2,
            seed: self.seed,
        })
    }
}

fn default_root() -> String {
    "cifar-10".to_string()
}

fn default_augment_padding() -> usize {
    4
}

fn default_in_channels() -> usize {
    3
}

fn default_conv_channels() -> Vec<usize> {
    vec![96, 192, 384, 384, 192]
}

fn default_fc_dim() -> usize {
    4096
}

fn default_feat_dim() -> usize {
    128
}

fn default_seed() -> u64 {
    42
}

fn default_extractor_batch() -> usize {
    256
}

fn default_extractor_epochs() -> usize {
    20
}

fn default_learning_rate() -> f32 {
    1e-3
}

fn default_hidden_layers() -> usize {
    2
}

fn default_large_batch() -> usize {
    1024
}

fn default_small_batch() -> usize {
    128
}

fn default_field_epochs() -> usize {
    200
}

fn default_m_max() -> f32 {
    20.0
}

fn default_gamma() -> f32 {
    0.3
}

fn default_sigma() -> f32 {
    0.01
}

fn default_tau() -> f32 {
    0.03
}

fn default_delta() -> f32 {
    0.01
}

fn default_steps() -> usize {
    100
}

fn default_probe_epochs() -> usize {
    200
}

fn default_probe_learning_rate() -> f32 {
    0.1
}

fn default_probe_l2() -> f32 {
    1e-4
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}
