//! Train/validate/test lifecycle of one run.

use burn::module::Module;
use burn::optim::AdamWConfig;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::AutodiffBackend;
use models::{UNet, UNetConfig};
use seg_dataset::{DataLoader, ImageMaskDataset, LoaderConfig, Split, TransformPipeline};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::config::{Precision, TrainingConfig};
use crate::error::{Result, TrainingError};
use crate::history::PassSummary;
use crate::loss::BceDiceLoss;
use crate::reporter::{EpochReport, TrainingReporter};
use crate::runner::{eval_epoch, train_epoch, LrPolicy};
use crate::scaler::{GradScaler, GradScalerConfig};
use crate::schedule::{LrSchedule, OneCycleConfig};
use crate::ADBackend;

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub epochs: Vec<EpochReport>,
    pub test: PassSummary,
    /// Weights file as written, extension included.
    pub model_path: PathBuf,
    /// Scheduler steps taken over the whole run.
    pub lr_steps: usize,
    /// Optimizer steps skipped by the gradient scaler.
    pub skipped_steps: usize,
}

pub struct Orchestrator {
    cfg: TrainingConfig,
}

impl Orchestrator {
    pub fn new(cfg: TrainingConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.cfg
    }

    /// Run on the compiled-in training backend.
    pub fn run(&self, reporter: &dyn TrainingReporter) -> Result<RunReport> {
        let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
        self.run_on::<ADBackend>(&device, reporter)
    }

    pub fn run_on<B: AutodiffBackend>(
        &self,
        device: &B::Device,
        reporter: &dyn TrainingReporter,
    ) -> Result<RunReport> {
        let cfg = &self.cfg;
        cfg.validate()?;

        B::seed(cfg.seed);
        reporter.device(&format!("{:?} ({:?})", cfg.device, device).to_lowercase());

        let mut train_loader = DataLoader::new(
            ImageMaskDataset::from_split(
                &cfg.data_root,
                Split::Train,
                TransformPipeline::train(cfg.image_size),
            )?,
            self.loader_config(true),
        )?;
        let mut val_loader = DataLoader::new(
            ImageMaskDataset::from_split(
                &cfg.data_root,
                Split::Val,
                TransformPipeline::eval(cfg.image_size),
            )?,
            self.loader_config(false),
        )?;
        let mut test_loader = DataLoader::new(
            ImageMaskDataset::from_split(
                &cfg.data_root,
                Split::Test,
                TransformPipeline::eval(cfg.image_size),
            )?,
            self.loader_config(false),
        )?;

        let mut model = UNet::<B>::new(
            UNetConfig {
                base_channels: cfg.base_channels,
                depth: cfg.depth,
                ..UNetConfig::new(3, 1)
            },
            device,
        );
        let mut optim = AdamWConfig::new()
            .with_weight_decay(cfg.weight_decay)
            .init::<B, UNet<B>>();
        let steps_per_epoch = train_loader.len();
        let mut scheduler =
            OneCycleConfig::new(cfg.learning_rate, steps_per_epoch * cfg.epochs).init();
        let criterion = BceDiceLoss::new(cfg.bce_weight, cfg.dice_weight);
        let mut scaler = GradScaler::new(GradScalerConfig {
            enabled: cfg.precision == Precision::Mixed,
            ..Default::default()
        });
        info!(
            params = model.num_params(),
            steps_per_epoch,
            epochs = cfg.epochs,
            precision = ?cfg.precision,
            "starting training"
        );

        let mut epochs = Vec::with_capacity(cfg.epochs);
        for epoch in 1..=cfg.epochs {
            reporter.epoch_started(epoch, cfg.epochs);
            let train_hist = train_epoch::<B, _, _, _, _>(
                &mut model,
                &mut train_loader,
                &mut optim,
                &criterion,
                device,
                &mut scaler,
                LrPolicy::Scheduled(&mut scheduler),
                cfg.progress,
            )?;
            let val_hist = eval_epoch::<B, _, _, _>(
                &model,
                &mut val_loader,
                &criterion,
                device,
                "Validating",
                cfg.progress,
            )?;
            let report = EpochReport {
                epoch,
                epochs: cfg.epochs,
                lr: scheduler.last_lr(),
                train: train_hist.summary(),
                val: val_hist.summary(),
            };
            reporter.epoch_finished(&report);
            epochs.push(report);
        }
        reporter.training_complete();

        let test = eval_epoch::<B, _, _, _>(
            &model,
            &mut test_loader,
            &criterion,
            device,
            "Testing",
            cfg.progress,
        )?
        .summary();
        reporter.test_finished(&test);

        fs::create_dir_all(&cfg.models_root).map_err(|source| TrainingError::Io {
            path: cfg.models_root.clone(),
            source,
        })?;
        let stem = cfg.model_path();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .save_file(stem.clone(), &recorder)
            .map_err(|e| TrainingError::Checkpoint {
                path: stem.clone(),
                msg: e.to_string(),
            })?;
        let model_path = cfg.weights_path();
        reporter.model_saved(&model_path);

        Ok(RunReport {
            epochs,
            test,
            model_path,
            lr_steps: scheduler.step_count(),
            skipped_steps: scaler.skipped_steps(),
        })
    }

    fn loader_config(&self, train: bool) -> LoaderConfig {
        LoaderConfig {
            batch_size: self.cfg.batch_size,
            shuffle: train,
            seed: self.cfg.seed,
            drop_last: train && self.cfg.drop_last,
            num_workers: self.cfg.num_workers,
        }
    }
}
