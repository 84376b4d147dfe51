//! Integration tests for loading segmentation splits from disk.
//!
//! These tests verify that:
//! 1. Split directories are indexed into sorted image/mask pairs
//! 2. Missing masks and missing directories are fatal
//! 3. A loader over a filesystem split yields correctly shaped batches

use image::{GrayImage, Luma, Rgb, RgbImage};
use seg_dataset::{
    DataLoader, ImageMaskDataset, LoaderConfig, SegDatasetError, SegmentationDataset, Split,
    TransformPipeline,
};
use std::fs;
use std::path::Path;

/// Write `count` 8x8 image/mask pairs under `<root>/<split>`.
fn create_split(root: &Path, split: &str, count: usize) -> anyhow::Result<()> {
    let images = root.join(split).join("images");
    let masks = root.join(split).join("masks");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&masks)?;
    for i in 0..count {
        let mut img = RgbImage::new(8, 8);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([(i * 30) as u8, 128, 200]);
        }
        img.save(images.join(format!("sample_{i:03}.png")))?;

        let mut mask = GrayImage::new(8, 8);
        for y in 2..6 {
            for x in 2..6 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask.save(masks.join(format!("sample_{i:03}.png")))?;
    }
    Ok(())
}

#[test]
fn split_is_indexed_in_name_order() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "train", 3)?;
    fs::write(tmp.path().join("train/images/notes.txt"), "ignored")?;

    let ds = ImageMaskDataset::from_split(tmp.path(), Split::Train, TransformPipeline::eval((8, 8)))?;

    assert_eq!(ds.len(), 3);
    let names: Vec<String> = ds
        .samples()
        .iter()
        .filter_map(|s| s.image.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names, vec!["sample_000.png", "sample_001.png", "sample_002.png"]);
    Ok(())
}

#[test]
fn sample_has_resized_binary_mask() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "val", 1)?;

    let ds = ImageMaskDataset::from_split(tmp.path(), Split::Val, TransformPipeline::eval((16, 16)))?;
    let sample = ds.get(0, 0)?;

    assert_eq!(sample.dims(), (16, 16));
    assert_eq!(sample.mask_hw.len(), 256);
    assert!(sample.mask_hw.iter().all(|v| *v == 0.0 || *v == 1.0));
    assert_eq!(sample.mask_hw[8 * 16 + 8], 1.0);
    assert_eq!(sample.mask_hw[0], 0.0);
    Ok(())
}

#[test]
fn missing_mask_is_fatal() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "test", 2)?;
    fs::remove_file(tmp.path().join("test/masks/sample_001.png"))?;

    let err = ImageMaskDataset::from_split(tmp.path(), Split::Test, TransformPipeline::eval((8, 8)))
        .unwrap_err();
    assert!(matches!(err, SegDatasetError::MissingMask { .. }));
    Ok(())
}

#[test]
fn missing_split_directory_is_fatal() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let err = ImageMaskDataset::from_split(tmp.path(), Split::Val, TransformPipeline::eval((8, 8)))
        .unwrap_err();
    assert!(matches!(err, SegDatasetError::Io { .. }));
    Ok(())
}

#[test]
fn empty_split_is_fatal() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    fs::create_dir_all(tmp.path().join("train/images"))?;
    fs::create_dir_all(tmp.path().join("train/masks"))?;
    let err = ImageMaskDataset::from_split(tmp.path(), Split::Train, TransformPipeline::eval((8, 8)))
        .unwrap_err();
    assert!(matches!(err, SegDatasetError::EmptySplit(_)));
    Ok(())
}

#[test]
fn augmented_loader_is_reproducible_for_a_seed() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), "train", 5)?;
    let cfg = LoaderConfig {
        batch_size: 2,
        shuffle: true,
        seed: 9,
        drop_last: false,
        num_workers: 2,
    };
    let build = || -> anyhow::Result<DataLoader<ImageMaskDataset>> {
        let ds = ImageMaskDataset::from_split(
            tmp.path(),
            Split::Train,
            TransformPipeline::train((8, 8)),
        )?;
        Ok(DataLoader::new(ds, cfg.clone())?)
    };

    let mut a = build()?;
    let mut b = build()?;
    assert_eq!(a.len(), 3);
    let batches_a: Vec<_> = a.iter().collect::<Result<_, _>>()?;
    let batches_b: Vec<_> = b.iter().collect::<Result<_, _>>()?;
    assert_eq!(batches_a.len(), 3);
    for (x, y) in batches_a.iter().zip(&batches_b) {
        assert_eq!(x.indices, y.indices);
        assert_eq!(x.images, y.images);
        assert_eq!(x.masks, y.masks);
        assert_eq!(x.image_shape()[1..], [3, 8, 8]);
    }
    Ok(())
}
