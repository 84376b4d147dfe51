//! Indexable image/mask collections.

use crate::aug::TransformPipeline;
use crate::types::{DatasetResult, SegDatasetError, SegSample, Split};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A fixed-length collection of transformed image/mask pairs.
///
/// `seed` drives any random augmentation for this draw; the same `(index, seed)` must
/// always produce the same sample.
pub trait SegmentationDataset: Send + Sync {
    fn len(&self) -> usize;

    fn get(&self, index: usize, seed: u64) -> DatasetResult<SegSample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SamplePaths {
    pub image: PathBuf,
    pub mask: PathBuf,
}

/// Filesystem dataset laid out as `<root>/images/<name>.{png,jpg,jpeg}` with the mask at
/// `<root>/masks/<stem>.png`.
#[derive(Debug, Clone)]
pub struct ImageMaskDataset {
    root: PathBuf,
    samples: Vec<SamplePaths>,
    transform: TransformPipeline,
}

impl ImageMaskDataset {
    pub fn new(root: &Path, transform: TransformPipeline) -> DatasetResult<Self> {
        let samples = index_pairs(root)?;
        if samples.is_empty() {
            return Err(SegDatasetError::EmptySplit(root.to_path_buf()));
        }
        info!(
            root = %root.display(),
            samples = samples.len(),
            transform = %transform.describe(),
            "indexed segmentation dataset"
        );
        Ok(Self {
            root: root.to_path_buf(),
            samples,
            transform,
        })
    }

    /// Open `<data_root>/<split>`.
    pub fn from_split(
        data_root: &Path,
        split: Split,
        transform: TransformPipeline,
    ) -> DatasetResult<Self> {
        Self::new(&data_root.join(split.as_str()), transform)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn samples(&self) -> &[SamplePaths] {
        &self.samples
    }

    pub fn transform(&self) -> &TransformPipeline {
        &self.transform
    }
}

impl SegmentationDataset for ImageMaskDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize, seed: u64) -> DatasetResult<SegSample> {
        let paths = self.samples.get(index).ok_or_else(|| {
            SegDatasetError::Other(format!(
                "index {index} out of range for {} samples",
                self.samples.len()
            ))
        })?;
        let img = image::open(&paths.image)
            .map_err(|source| SegDatasetError::Image {
                path: paths.image.clone(),
                source,
            })?
            .to_rgb8();
        let mask = image::open(&paths.mask)
            .map_err(|source| SegDatasetError::Image {
                path: paths.mask.clone(),
                source,
            })?
            .to_luma8();
        let mut rng = StdRng::seed_from_u64(seed);
        self.transform.apply(img, mask, &paths.image, &mut rng)
    }
}

/// List image/mask pairs under `root`, sorted by image file name.
pub fn index_pairs(root: &Path) -> DatasetResult<Vec<SamplePaths>> {
    let images_dir = root.join("images");
    let masks_dir = root.join("masks");
    let entries = fs::read_dir(&images_dir).map_err(|source| SegDatasetError::Io {
        path: images_dir.clone(),
        source,
    })?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SegDatasetError::Io {
            path: images_dir.clone(),
            source,
        })?;
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            images.push(path);
        } else {
            debug!(path = %path.display(), "skipping non-image entry");
        }
    }
    images.sort();

    images
        .into_iter()
        .map(|image| {
            let stem = image
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mask = masks_dir.join(format!("{stem}.png"));
            if !mask.is_file() {
                return Err(SegDatasetError::MissingMask {
                    image,
                    expected: mask,
                });
            }
            Ok(SamplePaths { image, mask })
        })
        .collect()
}

/// Pre-built samples held in memory; useful for tests and synthetic data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<SegSample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<SegSample>) -> Self {
        Self { samples }
    }
}

impl SegmentationDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize, _seed: u64) -> DatasetResult<SegSample> {
        self.samples.get(index).cloned().ok_or_else(|| {
            SegDatasetError::Other(format!(
                "index {index} out of range for {} samples",
                self.samples.len()
            ))
        })
    }
}
