//! Run configuration: defaults, then an optional TOML file, then command-line overrides.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, TrainingError};

pub const DEFAULT_CONFIG_NAME: &str = "unet-train.toml";
pub const CONFIG_ENV_VAR: &str = "UNET_TRAIN_CONFIG";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// `Mixed` turns on dynamic loss scaling; `Full` trains without it.
///
/// Neither changes compute precision: the forward and backward passes run in the backend's
/// float type (`f32` on both NdArray and Wgpu).
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Mixed,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f32,
    pub batch_size: usize,
    pub num_workers: usize,
    pub device: DeviceKind,
    pub seed: u64,
    pub data_root: PathBuf,
    pub models_root: PathBuf,
    pub model_name: String,
    /// (width, height) every sample is resized to.
    pub image_size: (u32, u32),
    pub base_channels: usize,
    pub depth: usize,
    pub precision: Precision,
    pub drop_last: bool,
    pub progress: bool,
    pub bce_weight: f32,
    pub dice_weight: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 25,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            batch_size: 8,
            num_workers: 4,
            device: DeviceKind::Cpu,
            seed: 42,
            data_root: PathBuf::from("data"),
            models_root: PathBuf::from("models"),
            model_name: "UNet".to_string(),
            image_size: (256, 256),
            base_channels: 32,
            depth: 4,
            precision: Precision::Mixed,
            drop_last: false,
            progress: true,
            bce_weight: 1.0,
            dice_weight: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TrainingConfigFile {
    epochs: Option<usize>,
    learning_rate: Option<f64>,
    weight_decay: Option<f32>,
    batch_size: Option<usize>,
    num_workers: Option<usize>,
    device: Option<DeviceKind>,
    seed: Option<u64>,
    data_root: Option<String>,
    models_root: Option<String>,
    model_name: Option<String>,
    image_size: Option<(u32, u32)>,
    model: Option<ModelSection>,
    precision: Option<Precision>,
    drop_last: Option<bool>,
    progress: Option<bool>,
    loss: Option<LossSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelSection {
    base_channels: Option<usize>,
    depth: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LossSection {
    bce_weight: Option<f32>,
    dice_weight: Option<f32>,
}

impl TrainingConfig {
    /// Resolve the file layer: an explicit path, else `UNET_TRAIN_CONFIG`, else
    /// `unet-train.toml` in the working directory if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::from_path(Path::new(&path));
            }
        }
        let default_path = Path::new(DEFAULT_CONFIG_NAME);
        if default_path.exists() {
            return Self::from_path(default_path);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| TrainingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_toml_str(&raw).map_err(|source| TrainingError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded training config");
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        let file: TrainingConfigFile = toml::from_str(raw)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: TrainingConfigFile) -> Self {
        let d = Self::default();
        let model = file.model.unwrap_or_default();
        let loss = file.loss.unwrap_or_default();
        Self {
            epochs: file.epochs.unwrap_or(d.epochs),
            learning_rate: file.learning_rate.unwrap_or(d.learning_rate),
            weight_decay: file.weight_decay.unwrap_or(d.weight_decay),
            batch_size: file.batch_size.unwrap_or(d.batch_size),
            num_workers: file.num_workers.unwrap_or(d.num_workers),
            device: file.device.unwrap_or(d.device),
            seed: file.seed.unwrap_or(d.seed),
            data_root: file.data_root.map(PathBuf::from).unwrap_or(d.data_root),
            models_root: file.models_root.map(PathBuf::from).unwrap_or(d.models_root),
            model_name: file
                .model_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(d.model_name),
            image_size: file.image_size.unwrap_or(d.image_size),
            base_channels: model.base_channels.unwrap_or(d.base_channels),
            depth: model.depth.unwrap_or(d.depth),
            precision: file.precision.unwrap_or(d.precision),
            drop_last: file.drop_last.unwrap_or(d.drop_last),
            progress: file.progress.unwrap_or(d.progress),
            bce_weight: loss.bce_weight.unwrap_or(d.bce_weight),
            dice_weight: loss.dice_weight.unwrap_or(d.dice_weight),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrainingError::InvalidConfig(msg));
        if self.epochs == 0 {
            return invalid("epochs must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        let (w, h) = self.image_size;
        if w == 0 || h == 0 {
            return invalid("image_size must be non-zero".to_string());
        }
        if self.depth == 0 || self.base_channels == 0 {
            return invalid("model depth and base_channels must be > 0".to_string());
        }
        let multiple = 1u32 << self.depth.min(31);
        if w % multiple != 0 || h % multiple != 0 {
            return invalid(format!(
                "image_size {w}x{h} must be divisible by {multiple} for depth {}",
                self.depth
            ));
        }
        if self.model_name.trim().is_empty() {
            return invalid("model_name must not be empty".to_string());
        }
        validate_backend_choice(self.device)
    }

    /// Weights destination without extension; the recorder appends `.bin`.
    pub fn model_path(&self) -> PathBuf {
        self.models_root.join(&self.model_name)
    }

    /// File the binary recorder writes for [`Self::model_path`]. The recorder replaces any
    /// extension on the stem, so a dotted name loses its last segment.
    pub fn weights_path(&self) -> PathBuf {
        self.model_path().with_extension("bin")
    }
}

/// Reject a GPU run on a CPU-only build.
pub fn validate_backend_choice(kind: DeviceKind) -> Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (DeviceKind::Gpu, false) => Err(TrainingError::InvalidConfig(
            "backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose --device cpu"
                .to_string(),
        )),
        (DeviceKind::Cpu, true) => {
            warn!("built with backend-wgpu; training will still use the WGPU backend despite --device cpu");
            Ok(())
        }
        _ => Ok(()),
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "unet-train", about = "Train a U-Net binary segmentation model")]
pub struct TrainArgs {
    /// TOML config file (defaults to $UNET_TRAIN_CONFIG or ./unet-train.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Number of epochs.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Peak learning rate of the one-cycle schedule.
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Loader worker threads (0 loads on the main thread).
    #[arg(long)]
    pub num_workers: Option<usize>,
    #[arg(long, value_enum)]
    pub device: Option<DeviceKind>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Directory holding train/, val/ and test/.
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    /// Directory the trained weights are written to.
    #[arg(long)]
    pub models_root: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub precision: Option<Precision>,
    /// Hide progress bars.
    #[arg(long)]
    pub no_progress: bool,
}

impl TrainArgs {
    pub fn apply(&self, cfg: &mut TrainingConfig) {
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.lr {
            cfg.learning_rate = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.num_workers {
            cfg.num_workers = v;
        }
        if let Some(v) = self.device {
            cfg.device = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = &self.data_root {
            cfg.data_root = v.clone();
        }
        if let Some(v) = &self.models_root {
            cfg.models_root = v.clone();
        }
        if let Some(v) = self.precision {
            cfg.precision = v;
        }
        if self.no_progress {
            cfg.progress = false;
        }
    }

    /// Full layering: defaults, file, then these flags; validated.
    pub fn resolve(&self) -> Result<TrainingConfig> {
        let mut cfg = TrainingConfig::load(self.config.as_deref())?;
        self.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }
}
