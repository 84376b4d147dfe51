//! Dynamic loss scaling for reduced-precision training.
//!
//! The loss is multiplied by `scale` before backprop so small gradients survive in low
//! precision. Gradients are divided back before the optimizer step. Any non-finite gradient
//! skips the step and halves the scale; a run of finite steps doubles it again.

use burn::module::{AutodiffModule, ModuleVisitor, ParamId};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use std::marker::PhantomData;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GradScalerConfig {
    pub init_scale: f32,
    pub growth_factor: f32,
    pub backoff_factor: f32,
    /// Consecutive finite steps before the scale grows.
    pub growth_interval: usize,
    pub enabled: bool,
}

impl Default for GradScalerConfig {
    fn default() -> Self {
        Self {
            init_scale: 65536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradScaler {
    cfg: GradScalerConfig,
    scale: f32,
    growth_tracker: usize,
    skipped_steps: usize,
}

impl GradScaler {
    pub fn new(cfg: GradScalerConfig) -> Self {
        let scale = if cfg.enabled { cfg.init_scale } else { 1.0 };
        Self {
            cfg,
            scale,
            growth_tracker: 0,
            skipped_steps: 0,
        }
    }

    /// A pass-through scaler: scale 1, never skips.
    pub fn disabled() -> Self {
        Self::new(GradScalerConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    pub fn scale_loss<B: AutodiffBackend, const D: usize>(&self, loss: Tensor<B, D>) -> Tensor<B, D> {
        if self.cfg.enabled {
            loss.mul_scalar(self.scale)
        } else {
            loss
        }
    }

    /// Divide every gradient of `module` by the current scale in place.
    /// Returns true when any gradient holds an inf or NaN.
    pub fn unscale<B, M>(&self, module: &M, grads: &mut GradientsParams) -> bool
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut visitor = Unscale::<B> {
            grads,
            inv_scale: 1.0 / self.scale,
            found_inf: false,
            _backend: PhantomData,
        };
        module.visit(&mut visitor);
        visitor.found_inf
    }

    /// Unscale, step the optimizer unless a gradient overflowed, then update the scale.
    /// Returns whether the optimizer step was applied.
    pub fn step<B, M, O>(
        &mut self,
        optim: &mut O,
        lr: f64,
        model: &mut M,
        mut grads: GradientsParams,
    ) -> bool
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        if !self.cfg.enabled {
            *model = optim.step(lr, model.clone(), grads);
            return true;
        }
        let found_inf = self.unscale::<B, M>(model, &mut grads);
        if !found_inf {
            *model = optim.step(lr, model.clone(), grads);
        }
        self.update(found_inf);
        !found_inf
    }

    pub fn update(&mut self, found_inf: bool) {
        if !self.cfg.enabled {
            return;
        }
        if found_inf {
            self.scale *= self.cfg.backoff_factor;
            self.growth_tracker = 0;
            self.skipped_steps += 1;
            debug!(scale = self.scale, "non-finite gradients; skipped optimizer step");
            return;
        }
        self.growth_tracker += 1;
        if self.growth_tracker >= self.cfg.growth_interval {
            self.scale *= self.cfg.growth_factor;
            self.growth_tracker = 0;
            debug!(scale = self.scale, "grad scale increased");
        }
    }
}

struct Unscale<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    inv_scale: f32,
    found_inf: bool,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Unscale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let grad = grad.mul_scalar(self.inv_scale);
        // inf or NaN anywhere poisons the sum.
        let total: f32 = grad.clone().sum().into_scalar().elem();
        if !total.is_finite() {
            self.found_inf = true;
        }
        self.grads.register::<B::InnerBackend, D>(id, grad);
    }
}
