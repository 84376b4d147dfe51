#![recursion_limit = "256"]

pub mod config;
pub mod error;
pub mod history;
pub mod loss;
pub mod metrics;
pub mod orchestrator;
pub mod reporter;
pub mod runner;
pub mod scaler;
pub mod schedule;
pub mod util;

pub use config::{DeviceKind, Precision, TrainArgs, TrainingConfig};
pub use error::{Result, TrainingError};
pub use history::{EpochHistory, PassSummary};
pub use loss::{BceDiceLoss, LossOutput, SegmentationCriterion};
pub use metrics::{dice_score, hausdorff_distance, BatchMetrics};
pub use models::{SegmentationModel, UNet, UNetConfig};
pub use orchestrator::{Orchestrator, RunReport};
pub use reporter::{ConsoleReporter, EpochReport, TrainingReporter};
pub use runner::{eval_epoch, run_pass, train_epoch, BatchStep, EvalStep, LrPolicy, TrainStep};
pub use scaler::{GradScaler, GradScalerConfig};
pub use schedule::{ConstantLr, LrSchedule, OneCycleConfig, OneCycleLr};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
