//! Segmentation dataset loading and Burn-compatible batching.
//!
//! This crate provides utilities for:
//! - Indexing image/mask pairs from a split directory
//! - Joint image/mask augmentation pipelines
//! - Parallel, re-iterable batch loading with per-pass shuffling

// Module declarations
pub mod aug;
pub mod batch;
pub mod dataset;
pub mod types;

// Re-export public API
pub use aug::{TransformPipeline, TransformPipelineBuilder, IMAGENET_MEAN, IMAGENET_STD};
pub use batch::{BatchIter, DataLoader, HostBatch, LoaderConfig, SegBatch};
pub use dataset::{index_pairs, ImageMaskDataset, InMemoryDataset, SamplePaths, SegmentationDataset};
pub use types::*;
