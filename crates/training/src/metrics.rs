//! Host-side segmentation quality metrics.
//!
//! Predictions are raw logits; a pixel is foreground when `sigmoid(logit) > 0.5`, i.e. when
//! the logit is positive. Masks are foreground where the value is above 0.5. Both metrics
//! are computed per image and averaged over the batch.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::util::to_host_vec;

const DICE_EPS: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchMetrics {
    pub dice: f32,
    pub hausdorff: f32,
}

impl BatchMetrics {
    /// Compute both metrics with a single host transfer per tensor.
    pub fn compute<B: Backend>(preds: &Tensor<B, 4>, masks: &Tensor<B, 4>) -> Self {
        let masks = BinaryMasks::from_targets(masks.clone());
        let preds = BinaryMasks::from_logits(preds.clone());
        Self {
            dice: preds.dice(&masks),
            hausdorff: preds.hausdorff(&masks),
        }
    }
}

/// Dice coefficient in `[0, 1]` of thresholded predictions against masks.
pub fn dice_score<B: Backend>(preds: &Tensor<B, 4>, masks: &Tensor<B, 4>) -> f32 {
    BinaryMasks::from_logits(preds.clone()).dice(&BinaryMasks::from_targets(masks.clone()))
}

/// Symmetric Hausdorff distance in pixels between predicted and true foreground boundaries.
pub fn hausdorff_distance<B: Backend>(preds: &Tensor<B, 4>, masks: &Tensor<B, 4>) -> f32 {
    BinaryMasks::from_logits(preds.clone()).hausdorff(&BinaryMasks::from_targets(masks.clone()))
}

/// A batch of binary masks on the host, `[batch, height, width]` row-major.
#[derive(Debug, Clone)]
pub struct BinaryMasks {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<bool>,
}

impl BinaryMasks {
    pub fn from_logits<B: Backend>(logits: Tensor<B, 4>) -> Self {
        Self::threshold(logits, 0.0)
    }

    pub fn from_targets<B: Backend>(targets: Tensor<B, 4>) -> Self {
        Self::threshold(targets, 0.5)
    }

    fn threshold<B: Backend>(tensor: Tensor<B, 4>, cut: f32) -> Self {
        let [batch, channels, height, width] = tensor.dims();
        // Single-channel maps; extra channels are folded into the batch.
        let data = to_host_vec(tensor).into_iter().map(|v| v > cut).collect();
        Self {
            batch: batch * channels,
            height,
            width,
            data,
        }
    }

    pub fn image(&self, index: usize) -> &[bool] {
        let plane = self.height * self.width;
        let start = (index * plane).min(self.data.len());
        let end = (start + plane).min(self.data.len());
        &self.data[start..end]
    }

    pub fn dice(&self, target: &BinaryMasks) -> f32 {
        let n = self.batch.min(target.batch);
        if n == 0 {
            return 0.0;
        }
        let total: f32 = (0..n)
            .map(|i| dice_single(self.image(i), target.image(i)))
            .sum();
        total / n as f32
    }

    pub fn hausdorff(&self, target: &BinaryMasks) -> f32 {
        let n = self.batch.min(target.batch);
        if n == 0 {
            return 0.0;
        }
        let total: f32 = (0..n)
            .map(|i| hausdorff_single(self.image(i), target.image(i), self.height, self.width))
            .sum();
        total / n as f32
    }
}

fn dice_single(pred: &[bool], target: &[bool]) -> f32 {
    let mut inter = 0usize;
    let mut pred_sum = 0usize;
    let mut target_sum = 0usize;
    for (&p, &t) in pred.iter().zip(target) {
        inter += (p && t) as usize;
        pred_sum += p as usize;
        target_sum += t as usize;
    }
    (2.0 * inter as f32 + DICE_EPS) / (pred_sum as f32 + target_sum as f32 + DICE_EPS)
}

/// Foreground pixels with at least one 4-neighbour outside the foreground (or off-image).
pub fn boundary_points(mask: &[bool], height: usize, width: usize) -> Vec<(usize, usize)> {
    let at = |y: usize, x: usize| mask.get(y * width + x).copied().unwrap_or(false);
    let mut points = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if !at(y, x) {
                continue;
            }
            let edge = y == 0
                || x == 0
                || y + 1 == height
                || x + 1 == width
                || !at(y - 1, x)
                || !at(y + 1, x)
                || !at(y, x - 1)
                || !at(y, x + 1);
            if edge {
                points.push((y, x));
            }
        }
    }
    points
}

fn directed_hausdorff(from: &[(usize, usize)], to: &[(usize, usize)]) -> f32 {
    let mut worst = 0.0f32;
    for &(ay, ax) in from {
        let mut best = f32::INFINITY;
        for &(by, bx) in to {
            let dy = ay as f32 - by as f32;
            let dx = ax as f32 - bx as f32;
            best = best.min(dy * dy + dx * dx);
            if best <= worst {
                break;
            }
        }
        worst = worst.max(best);
    }
    worst.sqrt()
}

/// Both empty is a perfect match; exactly one empty scores the image diagonal.
fn hausdorff_single(pred: &[bool], target: &[bool], height: usize, width: usize) -> f32 {
    let a = boundary_points(pred, height, width);
    let b = boundary_points(target, height, width);
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 0.0,
        (true, false) | (false, true) => ((height * height + width * width) as f32).sqrt(),
        (false, false) => directed_hausdorff(&a, &b).max(directed_hausdorff(&b, &a)),
    }
}
