//! Composite segmentation loss.

use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::util::scalar_value;

pub const COMBINED: &str = "combined";
pub const BCE: &str = "bce";
pub const DICE: &str = "dice";

/// Named loss components. Only `combined` is backpropagated; the rest are pass-through.
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    pub combined: Tensor<B, 1>,
    parts: Vec<(&'static str, Tensor<B, 1>)>,
}

impl<B: Backend> LossOutput<B> {
    pub fn new(combined: Tensor<B, 1>) -> Self {
        Self {
            combined,
            parts: Vec::new(),
        }
    }

    pub fn with_part(mut self, name: &'static str, value: Tensor<B, 1>) -> Self {
        self.parts.push((name, value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor<B, 1>> {
        if name == COMBINED {
            return Some(&self.combined);
        }
        self.parts.iter().find(|(n, _)| *n == name).map(|(_, t)| t)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(COMBINED).chain(self.parts.iter().map(|(n, _)| *n))
    }

    /// Host value of `combined`.
    pub fn combined_value(&self) -> f32 {
        scalar_value(self.combined.clone())
    }
}

/// Maps raw-logit predictions `[B,1,H,W]` and masks `[B,1,H,W]` to a loss result.
pub trait SegmentationCriterion<B: Backend> {
    fn compute(&self, preds: Tensor<B, 4>, masks: Tensor<B, 4>) -> LossOutput<B>;
}

/// Weighted sum of binary cross-entropy (on logits) and soft Dice loss.
#[derive(Debug, Clone)]
pub struct BceDiceLoss {
    pub bce_weight: f32,
    pub dice_weight: f32,
    /// Additive smoothing for the Dice ratio.
    pub smooth: f32,
}

impl Default for BceDiceLoss {
    fn default() -> Self {
        Self {
            bce_weight: 1.0,
            dice_weight: 1.0,
            smooth: 1.0,
        }
    }
}

impl BceDiceLoss {
    pub fn new(bce_weight: f32, dice_weight: f32) -> Self {
        Self {
            bce_weight,
            dice_weight,
            ..Default::default()
        }
    }

    /// Mean BCE computed from logits as `max(x,0) - x*y + ln(1 + e^-|x|)`.
    pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
        let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log();
        (logits.clone().clamp_min(0.0) - logits * targets + softplus).mean()
    }

    /// `1 - mean_b (2|P∩T| + s) / (|P| + |T| + s)` with `P = sigmoid(logits)`.
    pub fn soft_dice<B: Backend>(
        logits: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        smooth: f32,
    ) -> Tensor<B, 1> {
        let probs: Tensor<B, 2> = sigmoid(logits).flatten(1, 3);
        let targets: Tensor<B, 2> = targets.flatten(1, 3);
        let intersection = (probs.clone() * targets.clone()).sum_dim(1);
        let denom = probs.sum_dim(1) + targets.sum_dim(1);
        let dice = intersection
            .mul_scalar(2.0)
            .add_scalar(smooth)
            .div(denom.add_scalar(smooth));
        dice.mean().neg().add_scalar(1.0)
    }
}

impl<B: Backend> SegmentationCriterion<B> for BceDiceLoss {
    fn compute(&self, preds: Tensor<B, 4>, masks: Tensor<B, 4>) -> LossOutput<B> {
        let bce = Self::bce_with_logits(preds.clone(), masks.clone());
        let dice = Self::soft_dice(preds, masks, self.smooth);
        let combined =
            bce.clone().mul_scalar(self.bce_weight) + dice.clone().mul_scalar(self.dice_weight);
        LossOutput::new(combined)
            .with_part(BCE, bce)
            .with_part(DICE, dice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn tensor(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn zero_logits_give_ln2_bce() {
        let preds = tensor(vec![0.0; 4], [1, 1, 2, 2]);
        let masks = tensor(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]);
        let bce = scalar_value(BceDiceLoss::bce_with_logits(preds, masks));
        assert!((bce - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn bce_is_finite_for_extreme_logits() {
        let preds = tensor(vec![100.0, -100.0, 80.0, -80.0], [1, 1, 2, 2]);
        let masks = tensor(vec![1.0, 0.0, 0.0, 1.0], [1, 1, 2, 2]);
        let bce = scalar_value(BceDiceLoss::bce_with_logits(preds, masks));
        assert!(bce.is_finite());
        assert!((bce - 40.0).abs() < 1e-3);
    }

    #[test]
    fn confident_correct_prediction_has_near_zero_loss() {
        let masks = tensor(vec![1.0, 1.0, 0.0, 0.0], [1, 1, 2, 2]);
        let preds = tensor(vec![20.0, 20.0, -20.0, -20.0], [1, 1, 2, 2]);
        let out = BceDiceLoss::default().compute(preds, masks);
        assert!(out.combined_value() < 1e-3);
    }

    #[test]
    fn combined_is_weighted_sum_of_parts() {
        let masks = tensor(vec![1.0, 0.0, 0.0, 1.0], [1, 1, 2, 2]);
        let preds = tensor(vec![0.5, -1.0, 2.0, 0.0], [1, 1, 2, 2]);
        let loss = BceDiceLoss::new(0.25, 2.0);
        let out = loss.compute(preds, masks);

        let bce = scalar_value(out.get(BCE).cloned().expect("bce part"));
        let dice = scalar_value(out.get(DICE).cloned().expect("dice part"));
        assert!((out.combined_value() - (0.25 * bce + 2.0 * dice)).abs() < 1e-5);
        assert_eq!(out.names().collect::<Vec<_>>(), vec![COMBINED, BCE, DICE]);
    }

    #[test]
    fn combined_loss_is_differentiable() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        let preds = Tensor::<AD, 4>::from_data(
            TensorData::new(vec![0.3, -0.2, 0.1, 0.0], [1, 1, 2, 2]),
            &device,
        )
        .require_grad();
        let masks = Tensor::<AD, 4>::from_data(
            TensorData::new(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]),
            &device,
        );
        let out = BceDiceLoss::default().compute(preds.clone(), masks);
        let grads = out.combined.backward();
        let grad = preds.grad(&grads).expect("gradient for predictions");
        assert_eq!(grad.dims(), [1, 1, 2, 2]);
    }
}
