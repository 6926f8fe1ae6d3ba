//
// resize.rs
// IML-Prep
//
// Normalizes dataset images to a fixed square size, preserving each input tree.
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use image::{DynamicImage, Rgb};
use rayon::prelude::*;

use crate::batch;
use crate::models::BatchCounts;
use crate::transform;

pub const JPEG_QUALITY: u8 = 95;
pub const DEFAULT_ZOOM: f64 = 1.2;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ResizeMode {
    #[default]
    PadSquare,
    Letterbox,
    ZoomCrop,
}

impl ResizeMode {
    pub fn default_target(self) -> u32 {
        match self {
            ResizeMode::PadSquare => 640,
            ResizeMode::Letterbox | ResizeMode::ZoomCrop => 512,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResizeOptions {
    pub mode: ResizeMode,
    pub target: u32,
    pub zoom: f64,
    pub fill: Rgb<u8>,
}

impl ResizeOptions {
    pub fn new(mode: ResizeMode, target: Option<u32>) -> Self {
        Self {
            mode,
            target: target.unwrap_or_else(|| mode.default_target()),
            zoom: DEFAULT_ZOOM,
            fill: Rgb([0, 0, 0]),
        }
    }

    pub fn apply(&self, img: &DynamicImage) -> DynamicImage {
        match self.mode {
            ResizeMode::PadSquare => transform::pad_and_resize(img, self.target),
            ResizeMode::Letterbox => transform::letterbox(img, self.target, self.fill),
            ResizeMode::ZoomCrop => transform::zoom_crop(img, self.target, self.zoom),
        }
    }
}

fn resize_one(src: &Path, dest: &Path, options: &ResizeOptions) -> Result<()> {
    let img = image::open(src).with_context(|| format!("Failed to decode {:?}", src))?;
    batch::save_image(&options.apply(&img), dest, JPEG_QUALITY)
}

pub fn resize_dir(input: &Path, out_dir: &Path, options: &ResizeOptions) -> BatchCounts {
    batch::collect_images(input)
        .par_iter()
        .map(|src| {
            let rel = src.strip_prefix(input).unwrap_or(src);
            let dest = out_dir.join(rel);
            match resize_one(src, &dest, options) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(file = %src.display(), error = %e, "resize failed");
                    false
                }
            }
        })
        .fold(BatchCounts::default, |mut acc, ok| {
            if ok {
                acc.processed += 1;
            } else {
                acc.skipped += 1;
            }
            acc
        })
        .reduce(BatchCounts::default, |a, b| BatchCounts {
            processed: a.processed + b.processed,
            skipped: a.skipped + b.skipped,
        })
}

pub fn run(
    inputs: &[PathBuf],
    output: &Path,
    options: &ResizeOptions,
) -> Result<BTreeMap<String, BatchCounts>> {
    let mut report = BTreeMap::new();
    for input in inputs {
        if !input.is_dir() {
            tracing::warn!(dir = %input.display(), "input directory not found, skipping");
            continue;
        }
        let name = batch::file_name_str(input);
        let counts = resize_dir(input, &output.join(&name), options);
        tracing::info!(
            dir = %name,
            mode = ?options.mode,
            target = options.target,
            processed = counts.processed,
            "resized"
        );
        report.insert(name, counts);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mode_defaults() {
        assert_eq!(ResizeOptions::new(ResizeMode::PadSquare, None).target, 640);
        assert_eq!(ResizeOptions::new(ResizeMode::ZoomCrop, None).target, 512);
        assert_eq!(ResizeOptions::new(ResizeMode::Letterbox, Some(300)).target, 300);
    }

    #[test]
    fn resize_preserves_relative_tree() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("train");
        std::fs::create_dir_all(input.join("cranio")).expect("mkdir");
        DynamicImage::new_rgb8(40, 20)
            .save(input.join("cranio/x.jpg"))
            .expect("save");
        DynamicImage::new_rgb8(10, 30)
            .save(input.join("y.png"))
            .expect("save");

        let out = dir.path().join("out");
        let options = ResizeOptions::new(ResizeMode::PadSquare, Some(64));
        let report = run(&[input], &out, &options).expect("run");
        assert_eq!(report["train"].processed, 2);

        let img = image::open(out.join("train/cranio/x.jpg")).expect("open");
        assert_eq!((img.width(), img.height()), (64, 64));
        assert!(out.join("train/y.png").exists());
    }
}
