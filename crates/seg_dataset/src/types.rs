//! Core types and error definitions for seg_dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, SegDatasetError>;

#[derive(Debug, Error)]
pub enum SegDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("mask missing for image {image} (expected {expected})")]
    MissingMask { image: PathBuf, expected: PathBuf },
    #[error("image {image} is {image_size:?} but its mask is {mask_size:?}")]
    SizeMismatch {
        image: PathBuf,
        image_size: (u32, u32),
        mask_size: (u32, u32),
    },
    #[error("no samples found under {0}")]
    EmptySplit(PathBuf),
    #[error("batch shape mismatch: {0}")]
    BatchShape(String),
    #[error("{0}")]
    Other(String),
}

/// Dataset partition. Each split lives in its own directory under the data root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transformed image/mask pair, ready to be packed into a batch.
#[derive(Debug, Clone)]
pub struct SegSample {
    /// Image in CHW layout (3 channels), normalized.
    pub image_chw: Vec<f32>,
    /// Binary mask in HW layout, values in {0, 1}.
    pub mask_hw: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl SegSample {
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
