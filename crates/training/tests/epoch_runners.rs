//! Behaviour of the train/eval epoch runners on an in-memory dataset.

use burn::backend::{Autodiff, NdArray};
use burn::module::Module;
use burn::optim::AdamWConfig;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use seg_dataset::{DataLoader, InMemoryDataset, LoaderConfig, SegSample};
use std::cell::Cell;
use training::{
    eval_epoch, run_pass, train_epoch, BceDiceLoss, EvalStep, GradScaler, GradScalerConfig,
    LossOutput, LrPolicy, LrSchedule, OneCycleConfig, SegmentationCriterion, SegmentationModel,
    TrainingError, UNet, UNetConfig,
};

type TestBackend = NdArray<f32>;
type ADBackend = Autodiff<TestBackend>;

const SIDE: u32 = 4;

fn sample(seed: usize) -> SegSample {
    let plane = (SIDE * SIDE) as usize;
    let image_chw = (0..3 * plane)
        .map(|i| (((i + seed * 7) % 11) as f32 / 11.0) - 0.5)
        .collect();
    let mask_hw = (0..plane)
        .map(|i| if (i + seed) % 3 == 0 { 1.0 } else { 0.0 })
        .collect();
    SegSample {
        image_chw,
        mask_hw,
        width: SIDE,
        height: SIDE,
    }
}

fn loader(samples: usize, batch_size: usize, shuffle: bool) -> DataLoader<InMemoryDataset> {
    let ds = InMemoryDataset::new((0..samples).map(sample).collect());
    DataLoader::new(
        ds,
        LoaderConfig {
            batch_size,
            shuffle,
            seed: 3,
            drop_last: false,
            num_workers: 0,
        },
    )
    .expect("loader")
}

fn tiny_unet(device: &<ADBackend as Backend>::Device) -> UNet<ADBackend> {
    UNet::new(
        UNetConfig {
            base_channels: 2,
            depth: 1,
            ..UNetConfig::new(3, 1)
        },
        device,
    )
}

fn record_bytes(model: &UNet<ADBackend>) -> Vec<u8> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .expect("record model")
}

/// Returns preset loss values in call order, independent of the predictions.
struct FixedLosses {
    values: Vec<f32>,
    calls: Cell<usize>,
}

impl<B: Backend> SegmentationCriterion<B> for FixedLosses {
    fn compute(&self, preds: Tensor<B, 4>, _masks: Tensor<B, 4>) -> LossOutput<B> {
        let i = self.calls.get();
        self.calls.set(i + 1);
        let value = self.values[i % self.values.len()];
        LossOutput::new(Tensor::<B, 1>::from_floats([value], &preds.device()))
    }
}

/// Real BCE+Dice loss, except the call at `poisoned` is multiplied by NaN.
struct PoisonedBatch {
    poisoned: usize,
    calls: Cell<usize>,
}

impl<B: Backend> SegmentationCriterion<B> for PoisonedBatch {
    fn compute(&self, preds: Tensor<B, 4>, masks: Tensor<B, 4>) -> LossOutput<B> {
        let i = self.calls.get();
        self.calls.set(i + 1);
        let out = BceDiceLoss::default().compute(preds, masks);
        if i == self.poisoned {
            LossOutput::new(out.combined.mul_scalar(f32::NAN))
        } else {
            out
        }
    }
}

/// Predicts at half the input resolution.
struct HalfResolution;

impl<B: Backend> SegmentationModel<B> for HalfResolution {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [n, _, h, w] = images.dims();
        images.slice([0..n, 0..1, 0..h / 2, 0..w / 2])
    }
}

#[test]
fn non_finite_batch_is_skipped_and_the_pass_continues() {
    let device = Default::default();
    let mut model = tiny_unet(&device);
    let mut optim = AdamWConfig::new().init::<ADBackend, UNet<ADBackend>>();
    let mut scaler = GradScaler::new(GradScalerConfig::default());
    let mut loader = loader(3, 1, false);
    let mut sched = OneCycleConfig::new(1e-3, loader.len()).init();
    let criterion = PoisonedBatch {
        poisoned: 1,
        calls: Cell::new(0),
    };

    let history = train_epoch::<ADBackend, _, _, _, _>(
        &mut model,
        &mut loader,
        &mut optim,
        &criterion,
        &device,
        &mut scaler,
        LrPolicy::Scheduled(&mut sched),
        false,
    )
    .expect("train pass");

    assert_eq!(history.len(), 3);
    assert!(history.loss[0].is_finite());
    assert!(history.loss[1].is_nan());
    assert!(history.loss[2].is_finite());
    assert_eq!(scaler.skipped_steps(), 1);
    assert_eq!(scaler.scale(), 32768.0);
    assert_eq!(sched.step_count(), 3);
}

#[test]
fn prediction_shape_mismatch_aborts_the_pass() {
    let device = Default::default();
    let mut loader = loader(2, 2, false);
    let criterion = BceDiceLoss::default();
    let mut step = EvalStep::<TestBackend, _, _>::new(&HalfResolution, &criterion);

    let err = run_pass(&mut loader, &mut step, &device, "Validating", false).unwrap_err();

    assert!(matches!(err, TrainingError::Shape(_)));
}

#[test]
fn train_pass_steps_scheduler_once_per_batch() {
    let device = Default::default();
    let mut model = tiny_unet(&device);
    let mut optim = AdamWConfig::new().init::<ADBackend, UNet<ADBackend>>();
    let mut scaler = GradScaler::new(GradScalerConfig::default());
    let mut loader = loader(7, 2, true);
    let mut sched = OneCycleConfig::new(1e-3, loader.len()).init();
    let before = record_bytes(&model);

    let history = train_epoch::<ADBackend, _, _, _, _>(
        &mut model,
        &mut loader,
        &mut optim,
        &BceDiceLoss::default(),
        &device,
        &mut scaler,
        LrPolicy::Scheduled(&mut sched),
        false,
    )
    .expect("train pass");

    assert_eq!(loader.len(), 4);
    assert_eq!(sched.step_count(), 4);
    assert_eq!(history.len(), 4);
    assert_eq!(history.dice.len(), 4);
    assert_eq!(history.hausdorff.len(), 4);
    assert!(history.loss.iter().all(|l| l.is_finite() && *l > 0.0));
    assert!(history.dice.iter().all(|d| (0.0..=1.0).contains(d)));
    assert!(history.hausdorff.iter().all(|h| *h >= 0.0));
    assert_ne!(record_bytes(&model), before);
}

#[test]
fn train_pass_with_fixed_lr_and_full_precision() {
    let device = Default::default();
    let mut model = tiny_unet(&device);
    let mut optim = AdamWConfig::new().init::<ADBackend, UNet<ADBackend>>();
    let mut scaler = GradScaler::disabled();
    let mut loader = loader(4, 4, false);

    let history = train_epoch::<ADBackend, _, _, _, _>(
        &mut model,
        &mut loader,
        &mut optim,
        &BceDiceLoss::default(),
        &device,
        &mut scaler,
        LrPolicy::Fixed(1e-3),
        false,
    )
    .expect("train pass");

    assert_eq!(history.len(), 1);
    assert_eq!(scaler.scale(), 1.0);
}

#[test]
fn eval_pass_leaves_parameters_bit_identical() {
    let device = Default::default();
    let model = tiny_unet(&device);
    let mut loader = loader(5, 2, false);
    let before = record_bytes(&model);

    let history = eval_epoch::<ADBackend, _, _, _>(
        &model,
        &mut loader,
        &BceDiceLoss::default(),
        &device,
        "Validating",
        false,
    )
    .expect("eval pass");

    assert_eq!(history.len(), 3);
    assert_eq!(record_bytes(&model), before);
}

#[test]
fn eval_pass_is_idempotent_on_unchanged_model() {
    let device = Default::default();
    let model = tiny_unet(&device);
    let mut loader = loader(6, 4, false);
    let criterion = BceDiceLoss::default();

    let first = eval_epoch::<ADBackend, _, _, _>(&model, &mut loader, &criterion, &device, "Testing", false)
        .expect("first pass");
    let second = eval_epoch::<ADBackend, _, _, _>(&model, &mut loader, &criterion, &device, "Testing", false)
        .expect("second pass");

    assert_eq!(first.loss, second.loss);
    assert_eq!(first.dice, second.dice);
    assert_eq!(first.hausdorff, second.hausdorff);
}

#[test]
fn pass_mean_of_fixed_losses() {
    let device = Default::default();
    let model = tiny_unet(&device);
    let mut loader = loader(3, 1, false);
    let criterion = FixedLosses {
        values: vec![0.1, 0.2, 0.3],
        calls: Cell::new(0),
    };

    let history = eval_epoch::<ADBackend, _, _, _>(&model, &mut loader, &criterion, &device, "Validating", false)
        .expect("eval pass");

    assert_eq!(history.len(), 3);
    assert!((history.loss[0] - 0.1).abs() < 1e-6);
    assert!((history.loss[2] - 0.3).abs() < 1e-6);
    assert!((history.mean_loss() - 0.2).abs() < 1e-6);
}

#[test]
fn final_running_means_equal_pass_means() {
    let device = Default::default();
    let mut model = tiny_unet(&device);
    let mut optim = AdamWConfig::new().init::<ADBackend, UNet<ADBackend>>();
    let mut scaler = GradScaler::new(GradScalerConfig::default());
    let mut loader = loader(5, 2, false);

    let history = train_epoch::<ADBackend, _, _, _, _>(
        &mut model,
        &mut loader,
        &mut optim,
        &BceDiceLoss::default(),
        &device,
        &mut scaler,
        LrPolicy::Fixed(1e-3),
        false,
    )
    .expect("train pass");

    assert_eq!(history.running_loss(), history.mean_loss());
    assert_eq!(history.running_dice(), history.mean_dice());
    assert_eq!(history.running_hausdorff(), history.mean_hausdorff());
}
