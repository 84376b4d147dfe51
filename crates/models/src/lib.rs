//! Burn segmentation models.
//!
//! This crate defines the network used for binary segmentation:
//! - `UNet`: encoder/decoder with skip connections, `[B, C_in, H, W] -> [B, C_out, H, W]`.
//!
//! Models are plain Burn modules. Training vs. evaluation behaviour follows the backend:
//! on an autodiff backend batch-norm layers update their running statistics, on the inner
//! backend (see `AutodiffModule::valid`) they use them.
//!
//! ## Design Note
//! Outputs are raw logits. Thresholding and sigmoid live with the loss and metric code so
//! the model stays usable for any downstream post-processing.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// A model mapping an image batch to a same-resolution prediction batch.
pub trait SegmentationModel<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

#[derive(Debug, Clone)]
pub struct UNetConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Channels of the first encoder stage; doubled at every level.
    pub base_channels: usize,
    /// Number of down-sampling levels. Input height/width must be divisible by `2^depth`.
    pub depth: usize,
}

impl Default for UNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            out_channels: 1,
            base_channels: 32,
            depth: 4,
        }
    }
}

impl UNetConfig {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            ..Default::default()
        }
    }

    /// Side lengths must be a multiple of this for skip connections to line up.
    pub fn size_multiple(&self) -> usize {
        1 << self.depth
    }

    fn channels_at(&self, level: usize) -> usize {
        self.base_channels.max(1) << level
    }
}

/// Two 3x3 conv + batch-norm + ReLU layers.
#[derive(Debug, Module)]
pub struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |cin: usize, cout: usize| {
            Conv2dConfig::new([cin, cout], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init::<B>(device)
        };
        Self {
            conv1: conv(in_channels, out_channels),
            norm1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv(out_channels, out_channels),
            norm2: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(x)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

#[derive(Debug, Module)]
pub struct UNet<B: Backend> {
    encoders: Vec<DoubleConv<B>>,
    pool: MaxPool2d,
    bottleneck: DoubleConv<B>,
    /// Ordered deepest level first, i.e. in the order they are applied.
    upsamplers: Vec<ConvTranspose2d<B>>,
    decoders: Vec<DoubleConv<B>>,
    head: Conv2d<B>,
}

impl<B: Backend> UNet<B> {
    pub fn new(cfg: UNetConfig, device: &B::Device) -> Self {
        let depth = cfg.depth.max(1);
        let cfg = UNetConfig { depth, ..cfg };

        let mut encoders = Vec::with_capacity(depth);
        for level in 0..depth {
            let cin = if level == 0 {
                cfg.in_channels
            } else {
                cfg.channels_at(level - 1)
            };
            encoders.push(DoubleConv::new(cin, cfg.channels_at(level), device));
        }
        let bottleneck = DoubleConv::new(cfg.channels_at(depth - 1), cfg.channels_at(depth), device);

        let mut upsamplers = Vec::with_capacity(depth);
        let mut decoders = Vec::with_capacity(depth);
        for level in (0..depth).rev() {
            let wide = cfg.channels_at(level + 1);
            let narrow = cfg.channels_at(level);
            upsamplers.push(
                ConvTranspose2dConfig::new([wide, narrow], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
            );
            // Skip connection concatenates `narrow` encoder channels onto `narrow` up channels.
            decoders.push(DoubleConv::new(narrow * 2, narrow, device));
        }

        let head = Conv2dConfig::new([cfg.channels_at(0), cfg.out_channels], [1, 1]).init(device);

        Self {
            encoders,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck,
            upsamplers,
            decoders,
            head,
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.encoders.len());
        let mut x = images;
        for encoder in &self.encoders {
            x = encoder.forward(x);
            skips.push(x.clone());
            x = self.pool.forward(x);
        }

        x = self.bottleneck.forward(x);

        for (up, decoder) in self.upsamplers.iter().zip(&self.decoders) {
            let Some(skip) = skips.pop() else {
                break;
            };
            x = up.forward(x);
            x = decoder.forward(Tensor::cat(vec![skip, x], 1));
        }

        self.head.forward(x)
    }
}

impl<B: Backend> SegmentationModel<B> for UNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        UNet::forward(self, images)
    }
}
