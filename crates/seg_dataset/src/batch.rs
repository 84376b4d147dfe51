//! Batch iteration for training and evaluation.

use crate::dataset::SegmentationDataset;
use crate::types::{DatasetResult, SegDatasetError, SegSample};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Reshuffle sample order at the start of every pass.
    pub shuffle: bool,
    /// Base seed for shuffling and per-sample augmentation.
    pub seed: u64,
    /// Drop the trailing partial batch.
    pub drop_last: bool,
    /// Worker threads used to load one batch in parallel. 0 loads on the calling thread.
    pub num_workers: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            shuffle: false,
            seed: 0,
            drop_last: false,
            num_workers: 0,
        }
    }
}

/// Host-side batch: contiguous `f32` buffers plus their shape.
#[derive(Debug, Clone)]
pub struct HostBatch {
    /// `[batch, 3, height, width]`, row-major.
    pub images: Vec<f32>,
    /// `[batch, 1, height, width]`, row-major.
    pub masks: Vec<f32>,
    pub batch_size: usize,
    pub height: usize,
    pub width: usize,
    /// Dataset indices in batch order.
    pub indices: Vec<usize>,
}

pub struct SegBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub masks: Tensor<B, 4>,
}

impl HostBatch {
    pub fn from_samples(indices: Vec<usize>, samples: Vec<SegSample>) -> DatasetResult<Self> {
        let Some(first) = samples.first() else {
            return Err(SegDatasetError::BatchShape("empty batch".to_string()));
        };
        let (width, height) = first.dims();
        let plane = width as usize * height as usize;
        let mut images = Vec::with_capacity(samples.len() * 3 * plane);
        let mut masks = Vec::with_capacity(samples.len() * plane);
        for sample in &samples {
            if sample.dims() != (width, height) {
                return Err(SegDatasetError::BatchShape(format!(
                    "batch contains varying sizes {:?} and {:?}; set a target_size to force consistency",
                    (width, height),
                    sample.dims()
                )));
            }
            if sample.image_chw.len() != 3 * plane || sample.mask_hw.len() != plane {
                return Err(SegDatasetError::BatchShape(format!(
                    "sample buffers ({} image, {} mask) do not match {}x{}",
                    sample.image_chw.len(),
                    sample.mask_hw.len(),
                    width,
                    height
                )));
            }
            images.extend_from_slice(&sample.image_chw);
            masks.extend_from_slice(&sample.mask_hw);
        }
        Ok(Self {
            images,
            masks,
            batch_size: samples.len(),
            height: height as usize,
            width: width as usize,
            indices,
        })
    }

    pub fn image_shape(&self) -> [usize; 4] {
        [self.batch_size, 3, self.height, self.width]
    }

    pub fn mask_shape(&self) -> [usize; 4] {
        [self.batch_size, 1, self.height, self.width]
    }

    /// Upload to `device`. Buffers that disagree with the recorded shape are rejected.
    pub fn into_tensors<B: Backend>(self, device: &B::Device) -> DatasetResult<SegBatch<B>> {
        let image_shape = self.image_shape();
        let mask_shape = self.mask_shape();
        if self.images.len() != image_shape.iter().product::<usize>() {
            return Err(SegDatasetError::BatchShape(format!(
                "image buffer has {} values, expected shape {:?}",
                self.images.len(),
                image_shape
            )));
        }
        if self.masks.len() != mask_shape.iter().product::<usize>() {
            return Err(SegDatasetError::BatchShape(format!(
                "mask buffer has {} values, expected shape {:?}",
                self.masks.len(),
                mask_shape
            )));
        }
        let images = Tensor::<B, 4>::from_data(TensorData::new(self.images, image_shape), device);
        let masks = Tensor::<B, 4>::from_data(TensorData::new(self.masks, mask_shape), device);
        Ok(SegBatch { images, masks })
    }
}

/// Re-iterable batch loader over a dataset.
///
/// Every call to [`DataLoader::iter`] starts a new pass. Shuffled loaders draw a fresh order
/// per pass from `(seed, pass)`; unshuffled loaders always yield dataset order.
pub struct DataLoader<D> {
    dataset: D,
    cfg: LoaderConfig,
    pool: Option<rayon::ThreadPool>,
    passes: u64,
}

impl<D: SegmentationDataset> DataLoader<D> {
    pub fn new(dataset: D, cfg: LoaderConfig) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(SegDatasetError::Other("batch_size must be > 0".to_string()));
        }
        let pool = if cfg.num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.num_workers)
                .thread_name(|i| format!("seg-loader-{i}"))
                .build()
                .map_err(|e| SegDatasetError::Other(format!("failed to build loader pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            dataset,
            cfg,
            pool,
            passes: 0,
        })
    }

    /// Batches per pass: `ceil(len / batch_size)`, or `floor` with `drop_last`.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        if self.cfg.drop_last {
            n / self.cfg.batch_size
        } else {
            n.div_ceil(self.cfg.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Sample order used by pass number `pass` (1-based).
    pub fn order_for_pass(&self, pass: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.cfg.shuffle {
            let mut rng = StdRng::seed_from_u64(mix_seed(self.cfg.seed, pass, u64::MAX));
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn iter(&mut self) -> BatchIter<'_, D> {
        self.passes += 1;
        let pass = self.passes;
        let order = self.order_for_pass(pass);
        let total = self.len();
        BatchIter {
            loader: self,
            order,
            cursor: 0,
            yielded: 0,
            total,
            pass,
        }
    }

    fn load_batch(&self, indices: &[usize], pass: u64) -> DatasetResult<HostBatch> {
        let seed = self.cfg.seed;
        let load = |&index: &usize| self.dataset.get(index, mix_seed(seed, pass, index as u64));
        let samples: DatasetResult<Vec<SegSample>> = match &self.pool {
            Some(pool) => pool.install(|| indices.par_iter().map(load).collect()),
            None => indices.iter().map(load).collect(),
        };
        HostBatch::from_samples(indices.to_vec(), samples?)
    }
}

pub struct BatchIter<'a, D> {
    loader: &'a DataLoader<D>,
    order: Vec<usize>,
    cursor: usize,
    yielded: usize,
    total: usize,
    pass: u64,
}

impl<D: SegmentationDataset> Iterator for BatchIter<'_, D> {
    type Item = DatasetResult<HostBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.total || self.cursor >= self.order.len() {
            return None;
        }
        let batch_size = self.loader.cfg.batch_size;
        let end = (self.cursor + batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;
        self.yielded += 1;

        let started = Instant::now();
        let batch = self.loader.load_batch(slice, self.pass);
        debug!(
            pass = self.pass,
            batch = self.yielded,
            samples = slice.len(),
            load_ms = started.elapsed().as_secs_f64() * 1000.0,
            "loaded batch"
        );
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total.saturating_sub(self.yielded);
        (remaining, Some(remaining))
    }
}

impl<D: SegmentationDataset> ExactSizeIterator for BatchIter<'_, D> {}

/// SplitMix64-style mixing so neighbouring indices and passes get unrelated seeds.
fn mix_seed(seed: u64, pass: u64, index: u64) -> u64 {
    let mut z = seed
        .wrapping_add(pass.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(index.wrapping_mul(0xBF58_476D_1CE4_E5B9));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
