//! Error types for the training crate.

use seg_dataset::SegDatasetError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Dataset(#[from] SegDatasetError),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("failed to save model to {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error at {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
