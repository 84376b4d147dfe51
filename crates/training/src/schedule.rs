//! Per-batch learning-rate schedules.

use std::f64::consts::PI;

/// A learning-rate schedule stepped once per optimizer batch.
pub trait LrSchedule {
    /// LR to use for the next optimizer step.
    fn current_lr(&self) -> f64;

    /// Advance one batch.
    fn step(&mut self);

    /// Number of `step` calls so far.
    fn step_count(&self) -> usize;

    /// LR after the most recent step (what an epoch summary reports).
    fn last_lr(&self) -> f64 {
        self.current_lr()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantLr {
    lr: f64,
    steps: usize,
}

impl ConstantLr {
    pub fn new(lr: f64) -> Self {
        Self { lr, steps: 0 }
    }
}

impl LrSchedule for ConstantLr {
    fn current_lr(&self) -> f64 {
        self.lr
    }

    fn step(&mut self) {
        self.steps += 1;
    }

    fn step_count(&self) -> usize {
        self.steps
    }
}

#[derive(Debug, Clone)]
pub struct OneCycleConfig {
    pub max_lr: f64,
    pub total_steps: usize,
    /// Fraction of the cycle spent increasing the LR.
    pub pct_start: f64,
    /// `initial_lr = max_lr / div_factor`.
    pub div_factor: f64,
    /// `min_lr = initial_lr / final_div_factor`.
    pub final_div_factor: f64,
}

impl OneCycleConfig {
    pub fn new(max_lr: f64, total_steps: usize) -> Self {
        Self {
            max_lr,
            total_steps,
            pct_start: 0.3,
            div_factor: 25.0,
            final_div_factor: 1e4,
        }
    }

    pub fn init(self) -> OneCycleLr {
        OneCycleLr::new(self)
    }
}

/// Cosine one-cycle policy: warm up from `initial_lr` to `max_lr` over the first
/// `pct_start` of the run, then anneal down to `min_lr` at the last step.
#[derive(Debug, Clone)]
pub struct OneCycleLr {
    cfg: OneCycleConfig,
    initial_lr: f64,
    min_lr: f64,
    steps: usize,
    lr: f64,
}

impl OneCycleLr {
    pub fn new(cfg: OneCycleConfig) -> Self {
        let initial_lr = cfg.max_lr / cfg.div_factor;
        let min_lr = initial_lr / cfg.final_div_factor;
        let mut sched = Self {
            cfg,
            initial_lr,
            min_lr,
            steps: 0,
            lr: initial_lr,
        };
        sched.lr = sched.lr_at(0);
        sched
    }

    pub fn initial_lr(&self) -> f64 {
        self.initial_lr
    }

    pub fn min_lr(&self) -> f64 {
        self.min_lr
    }

    pub fn total_steps(&self) -> usize {
        self.cfg.total_steps
    }

    /// LR at position `step`; positions past the end stay at the final LR.
    pub fn lr_at(&self, step: usize) -> f64 {
        let total = self.cfg.total_steps.max(1);
        let step = step.min(total - 1) as f64;
        let warmup_end = self.cfg.pct_start * total as f64 - 1.0;
        let cycle_end = total as f64 - 1.0;

        if step <= warmup_end {
            let pct = phase_pct(step, 0.0, warmup_end);
            cosine_anneal(self.initial_lr, self.cfg.max_lr, pct)
        } else {
            let pct = phase_pct(step, warmup_end, cycle_end);
            cosine_anneal(self.cfg.max_lr, self.min_lr, pct)
        }
    }
}

impl LrSchedule for OneCycleLr {
    fn current_lr(&self) -> f64 {
        self.lr
    }

    fn step(&mut self) {
        self.steps += 1;
        self.lr = self.lr_at(self.steps);
    }

    fn step_count(&self) -> usize {
        self.steps
    }
}

fn phase_pct(step: f64, start: f64, end: f64) -> f64 {
    let span = end - start;
    if span <= 0.0 {
        1.0
    } else {
        ((step - start) / span).clamp(0.0, 1.0)
    }
}

fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}
