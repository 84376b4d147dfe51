//! Epoch runners: one pass over a loader in training or evaluation mode.
//!
//! Both modes share [`run_pass`]; what happens per batch is supplied by a [`BatchStep`].
//! [`TrainStep`] owns the optimizer side (scaler, optimizer, LR policy), [`EvalStep`] only
//! reads the model.

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::SegmentationModel;
use seg_dataset::{DataLoader, SegBatch, SegmentationDataset};
use std::marker::PhantomData;
use tracing::debug;

use crate::error::{Result, TrainingError};
use crate::history::EpochHistory;
use crate::loss::SegmentationCriterion;
use crate::metrics::BatchMetrics;
use crate::reporter::{pass_progress, progress_message};
use crate::scaler::GradScaler;
use crate::schedule::LrSchedule;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutcome {
    pub loss: f32,
    pub dice: f32,
    pub hausdorff: f32,
}

/// Per-batch work of a pass.
pub trait BatchStep {
    type Backend: Backend;

    fn run(&mut self, batch: SegBatch<Self::Backend>) -> Result<BatchOutcome>;
}

/// Where the optimizer's learning rate comes from.
pub enum LrPolicy<'a> {
    Fixed(f64),
    /// Stepped exactly once after every batch.
    Scheduled(&'a mut dyn LrSchedule),
}

impl LrPolicy<'_> {
    pub fn lr(&self) -> f64 {
        match self {
            LrPolicy::Fixed(lr) => *lr,
            LrPolicy::Scheduled(s) => s.current_lr(),
        }
    }

    fn advance(&mut self) {
        if let LrPolicy::Scheduled(s) = self {
            s.step();
        }
    }
}

pub struct TrainStep<'a, 's, B, M, O, C> {
    model: &'a mut M,
    optim: &'a mut O,
    criterion: &'a C,
    scaler: &'a mut GradScaler,
    lr: LrPolicy<'s>,
    _backend: PhantomData<B>,
}

impl<'a, 's, B, M, O, C> TrainStep<'a, 's, B, M, O, C> {
    pub fn new(
        model: &'a mut M,
        optim: &'a mut O,
        criterion: &'a C,
        scaler: &'a mut GradScaler,
        lr: LrPolicy<'s>,
    ) -> Self {
        Self {
            model,
            optim,
            criterion,
            scaler,
            lr,
            _backend: PhantomData,
        }
    }
}

impl<B, M, O, C> BatchStep for TrainStep<'_, '_, B, M, O, C>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    O: Optimizer<M, B>,
    C: SegmentationCriterion<B>,
{
    type Backend = B;

    fn run(&mut self, batch: SegBatch<B>) -> Result<BatchOutcome> {
        let preds = self.model.forward(batch.images);
        check_same_shape("prediction", &preds, &batch.masks)?;
        let metrics = BatchMetrics::compute(&preds, &batch.masks);

        let loss = self.criterion.compute(preds, batch.masks);
        let loss_value = loss.combined_value();

        // Fresh gradients every batch: nothing accumulates across backward passes.
        let scaled = self.scaler.scale_loss(loss.combined);
        let grads = GradientsParams::from_grads(scaled.backward(), &*self.model);
        let lr = self.lr.lr();
        let stepped = self
            .scaler
            .step::<B, M, O>(&mut *self.optim, lr, &mut *self.model, grads);
        if !stepped {
            debug!(loss = loss_value, "optimizer step skipped");
        }
        self.lr.advance();

        Ok(BatchOutcome {
            loss: loss_value,
            dice: metrics.dice,
            hausdorff: metrics.hausdorff,
        })
    }
}

pub struct EvalStep<'a, B, M, C> {
    model: &'a M,
    criterion: &'a C,
    _backend: PhantomData<B>,
}

impl<'a, B, M, C> EvalStep<'a, B, M, C> {
    pub fn new(model: &'a M, criterion: &'a C) -> Self {
        Self {
            model,
            criterion,
            _backend: PhantomData,
        }
    }
}

impl<B, M, C> BatchStep for EvalStep<'_, B, M, C>
where
    B: Backend,
    M: SegmentationModel<B>,
    C: SegmentationCriterion<B>,
{
    type Backend = B;

    fn run(&mut self, batch: SegBatch<B>) -> Result<BatchOutcome> {
        let preds = self.model.forward(batch.images);
        check_same_shape("prediction", &preds, &batch.masks)?;
        let metrics = BatchMetrics::compute(&preds, &batch.masks);
        let loss = self.criterion.compute(preds, batch.masks);
        Ok(BatchOutcome {
            loss: loss.combined_value(),
            dice: metrics.dice,
            hausdorff: metrics.hausdorff,
        })
    }
}

/// Iterate `loader` once in order, feeding every batch to `step`.
pub fn run_pass<D, S>(
    loader: &mut DataLoader<D>,
    step: &mut S,
    device: &<S::Backend as Backend>::Device,
    label: &str,
    show_progress: bool,
) -> Result<EpochHistory>
where
    D: SegmentationDataset,
    S: BatchStep,
{
    let total = loader.len();
    let bar = pass_progress(total, label, show_progress);
    let mut history = EpochHistory::with_capacity(total);

    for batch in loader.iter() {
        let batch = batch?.into_tensors::<S::Backend>(device)?;
        check_batch(&batch)?;
        let outcome = step.run(batch)?;
        history.record(outcome.loss, outcome.dice, outcome.hausdorff);
        bar.inc(1);
        bar.set_message(progress_message(
            history.running_loss(),
            history.running_dice(),
        ));
    }

    bar.finish();
    debug!(
        label,
        batches = history.len(),
        loss = history.mean_loss(),
        dice = history.mean_dice(),
        "pass finished"
    );
    Ok(history)
}

/// One training pass: gradient updates through `scaler`, LR from `lr`.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch<B, M, O, C, D>(
    model: &mut M,
    loader: &mut DataLoader<D>,
    optim: &mut O,
    criterion: &C,
    device: &B::Device,
    scaler: &mut GradScaler,
    lr: LrPolicy<'_>,
    show_progress: bool,
) -> Result<EpochHistory>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    O: Optimizer<M, B>,
    C: SegmentationCriterion<B>,
    D: SegmentationDataset,
{
    let mut step = TrainStep::<B, M, O, C>::new(model, optim, criterion, scaler, lr);
    run_pass(loader, &mut step, device, "Training", show_progress)
}

/// One gradient-free pass on the inner backend. Batch-norm uses its running statistics.
pub fn eval_epoch<B, M, C, D>(
    model: &M,
    loader: &mut DataLoader<D>,
    criterion: &C,
    device: &B::Device,
    label: &str,
    show_progress: bool,
) -> Result<EpochHistory>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
    C: SegmentationCriterion<B::InnerBackend>,
    D: SegmentationDataset,
{
    let inner = model.valid();
    let mut step = EvalStep::<B::InnerBackend, _, C>::new(&inner, criterion);
    run_pass(loader, &mut step, device, label, show_progress)
}

fn check_batch<B: Backend>(batch: &SegBatch<B>) -> Result<()> {
    let [n, _, h, w] = batch.images.dims();
    let [mn, mc, mh, mw] = batch.masks.dims();
    if (n, h, w) != (mn, mh, mw) || mc != 1 {
        return Err(TrainingError::Shape(format!(
            "images {:?} and masks {:?} disagree",
            batch.images.dims(),
            batch.masks.dims()
        )));
    }
    Ok(())
}

fn check_same_shape<B: Backend>(what: &str, a: &Tensor<B, 4>, masks: &Tensor<B, 4>) -> Result<()> {
    if a.dims() != masks.dims() {
        return Err(TrainingError::Shape(format!(
            "{what} {:?} does not match masks {:?}",
            a.dims(),
            masks.dims()
        )));
    }
    Ok(())
}
