//! Joint image/mask transformation pipeline.
//!
//! Geometric operations (resize, flips) are applied to both the image and its mask so the
//! pair stays aligned. Photometric operations (jitter, noise, blur) touch the image only.

use crate::types::{DatasetResult, SegDatasetError, SegSample};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;
use std::path::Path;

/// ImageNet channel statistics, applied after all pixel-space transforms.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    /// Resize image and mask to (width, height). If None, source dimensions are kept.
    pub target_size: Option<(u32, u32)>,
    pub flip_horizontal_prob: f32,
    pub flip_vertical_prob: f32,
    /// Probability of a brightness/contrast jitter.
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    /// Probability of adding uniform noise per channel.
    pub noise_prob: f32,
    /// Max absolute noise added (0-1 range).
    pub noise_strength: f32,
    pub blur_prob: f32,
    /// Blur sigma (passed to image::imageops::blur).
    pub blur_sigma: f32,
    /// Apply ImageNet mean/std normalization.
    pub normalize: bool,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::eval((256, 256))
    }
}

impl TransformPipeline {
    /// Deterministic policy used for validation and test splits.
    pub fn eval(target_size: (u32, u32)) -> Self {
        Self {
            target_size: Some(target_size),
            flip_horizontal_prob: 0.0,
            flip_vertical_prob: 0.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.0,
            noise_prob: 0.0,
            noise_strength: 0.0,
            blur_prob: 0.0,
            blur_sigma: 0.0,
            normalize: true,
        }
    }

    /// Augmenting policy used for the training split.
    pub fn train(target_size: (u32, u32)) -> Self {
        Self {
            target_size: Some(target_size),
            flip_horizontal_prob: 0.5,
            flip_vertical_prob: 0.5,
            color_jitter_prob: 0.3,
            color_jitter_strength: 0.2,
            noise_prob: 0.2,
            noise_strength: 0.02,
            blur_prob: 0.1,
            blur_sigma: 1.0,
            normalize: true,
        }
    }

    pub fn builder() -> TransformPipelineBuilder {
        TransformPipelineBuilder::new()
    }

    pub fn is_deterministic(&self) -> bool {
        self.flip_horizontal_prob <= 0.0
            && self.flip_vertical_prob <= 0.0
            && self.color_jitter_prob <= 0.0
            && self.noise_prob <= 0.0
            && self.blur_prob <= 0.0
    }

    pub fn describe(&self) -> String {
        let ts = self
            .target_size
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "target_size={} hflip_p={:.2} vflip_p={:.2} color_jitter_p={:.2} strength={:.2} noise_p={:.2} strength={:.3} blur_p={:.2} sigma={:.2} normalize={}",
            ts,
            self.flip_horizontal_prob,
            self.flip_vertical_prob,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.noise_prob,
            self.noise_strength,
            self.blur_prob,
            self.blur_sigma,
            self.normalize,
        )
    }

    /// Transform one decoded pair. `source` is only used for error reporting.
    pub fn apply(
        &self,
        img: RgbImage,
        mask: GrayImage,
        source: &Path,
        rng: &mut StdRng,
    ) -> DatasetResult<SegSample> {
        if img.dimensions() != mask.dimensions() {
            return Err(SegDatasetError::SizeMismatch {
                image: source.to_path_buf(),
                image_size: img.dimensions(),
                mask_size: mask.dimensions(),
            });
        }

        let (mut img, mut mask) = match self.target_size {
            Some((w, h)) if (w, h) != img.dimensions() => (
                image::imageops::resize(&img, w, h, FilterType::Triangle),
                // Nearest keeps the mask binary.
                image::imageops::resize(&mask, w, h, FilterType::Nearest),
            ),
            _ => (img, mask),
        };

        maybe_hflip(&mut img, &mut mask, self.flip_horizontal_prob, rng);
        maybe_vflip(&mut img, &mut mask, self.flip_vertical_prob, rng);
        maybe_jitter(
            &mut img,
            self.color_jitter_prob,
            self.color_jitter_strength,
            rng,
        );
        maybe_noise(&mut img, self.noise_prob, self.noise_strength, rng);
        maybe_blur(&mut img, self.blur_prob, self.blur_sigma, rng);

        Ok(build_sample(&img, &mask, self.normalize))
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    pipeline: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            pipeline: TransformPipeline {
                target_size: None,
                normalize: false,
                ..TransformPipeline::eval((0, 0))
            },
        }
    }

    pub fn target_size(mut self, size: Option<(u32, u32)>) -> Self {
        self.pipeline.target_size = size;
        self
    }

    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.pipeline.flip_horizontal_prob = p;
        self
    }

    pub fn flip_vertical_prob(mut self, p: f32) -> Self {
        self.pipeline.flip_vertical_prob = p;
        self
    }

    pub fn color_jitter(mut self, prob: f32, strength: f32) -> Self {
        self.pipeline.color_jitter_prob = prob;
        self.pipeline.color_jitter_strength = strength;
        self
    }

    pub fn noise(mut self, prob: f32, strength: f32) -> Self {
        self.pipeline.noise_prob = prob;
        self.pipeline.noise_strength = strength;
        self
    }

    pub fn blur(mut self, prob: f32, sigma: f32) -> Self {
        self.pipeline.blur_prob = prob;
        self.pipeline.blur_sigma = sigma;
        self
    }

    pub fn normalize(mut self, on: bool) -> Self {
        self.pipeline.normalize = on;
        self
    }

    pub fn build(self) -> TransformPipeline {
        self.pipeline
    }
}

fn build_sample(img: &RgbImage, mask: &GrayImage, normalize: bool) -> SegSample {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; 3 * plane];
    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            let mut v = pixel[c] as f32 / 255.0;
            if normalize {
                v = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
            image_chw[c * plane + i] = v;
        }
    }
    let mask_hw = mask
        .pixels()
        .map(|p| if p[0] > 0 { 1.0 } else { 0.0 })
        .collect();
    SegSample {
        image_chw,
        mask_hw,
        width,
        height,
    }
}

pub(crate) fn maybe_hflip(img: &mut RgbImage, mask: &mut GrayImage, prob: f32, rng: &mut StdRng) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
        image::imageops::flip_horizontal_in_place(mask);
    }
}

pub(crate) fn maybe_vflip(img: &mut RgbImage, mask: &mut GrayImage, prob: f32, rng: &mut StdRng) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_vertical_in_place(img);
        image::imageops::flip_vertical_in_place(mask);
    }
}

pub(crate) fn maybe_jitter(img: &mut RgbImage, prob: f32, strength: f32, rng: &mut StdRng) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let mut v = (v - 0.5) * contrast + 0.5;
            v *= bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_noise(img: &mut RgbImage, prob: f32, strength: f32, rng: &mut StdRng) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let noise = rng.random_range(-strength..strength);
            let v = (pixel[c] as f32 / 255.0 + noise).clamp(0.0, 1.0);
            pixel[c] = (v * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_blur(img: &mut RgbImage, prob: f32, sigma: f32, rng: &mut StdRng) {
    if prob <= 0.0 || sigma <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    *img = image::imageops::blur(img, sigma);
}
