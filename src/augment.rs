//
// augment.rs
// IML-Prep
//
// Offline augmentation of a training split. Each image goes through a fixed chain of random
// transforms, each applied with its own probability.
//

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::noise::gaussian_noise_mut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::batch;
use crate::error::PrepError;
use crate::models::BatchCounts;

pub const CROP_SIZE: u32 = 640;

/// Probability of each step, in pipeline order.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentProbabilities {
    pub resized_crop: f64,
    pub rotate90: f64,
    pub rotate: f64,
    pub rgb_shift: f64,
    pub jpeg: f64,
    pub blur: f64,
    pub noise: f64,
    pub hflip: f64,
}

impl Default for AugmentProbabilities {
    fn default() -> Self {
        Self {
            resized_crop: 0.4,
            rotate90: 0.5,
            rotate: 0.7,
            rgb_shift: 0.4,
            jpeg: 0.4,
            blur: 0.3,
            noise: 0.3,
            hflip: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AugmentOptions {
    pub seed: Option<u64>,
    /// Write here (mirroring the class layout) instead of overwriting the inputs.
    pub output: Option<PathBuf>,
    pub probabilities: AugmentProbabilities,
}

/// Per-file generator: fixed for a given seed and path, independent of processing order.
pub fn rng_for_file(seed: Option<u64>, path: &Path) -> StdRng {
    match seed {
        Some(seed) => {
            let mut hasher = Sha256::new();
            hasher.update(seed.to_le_bytes());
            hasher.update(path.to_string_lossy().as_bytes());
            let digest = hasher.finalize();
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            StdRng::seed_from_u64(u64::from_le_bytes(bytes))
        }
        None => StdRng::from_entropy(),
    }
}

pub fn augment_image<R: Rng>(
    img: &DynamicImage,
    probs: &AugmentProbabilities,
    rng: &mut R,
) -> Result<RgbImage> {
    let mut rgb = img.to_rgb8();

    if rng.gen_bool(probs.resized_crop) {
        rgb = random_resized_crop(&rgb, CROP_SIZE, rng);
    }
    if rng.gen_bool(probs.rotate90) {
        rgb = match rng.gen_range(0..4) {
            1 => imageops::rotate90(&rgb),
            2 => imageops::rotate180(&rgb),
            3 => imageops::rotate270(&rgb),
            _ => rgb,
        };
    }
    if rng.gen_bool(probs.rotate) {
        let degrees: f32 = rng.gen_range(-30.0..=30.0);
        rgb = rotate(&rgb, degrees);
    }
    if rng.gen_bool(probs.rgb_shift) {
        let shift = [
            rng.gen_range(-25..=25),
            rng.gen_range(-25..=25),
            rng.gen_range(-25..=25),
        ];
        rgb_shift(&mut rgb, shift);
    }
    if rng.gen_bool(probs.jpeg) {
        rgb = jpeg_roundtrip(&rgb, rng.gen_range(85..=100))?;
    }
    if rng.gen_bool(probs.blur) {
        rgb = DynamicImage::ImageRgb8(rgb)
            .filter3x3(&[1.0 / 9.0; 9])
            .to_rgb8();
    }
    if rng.gen_bool(probs.noise) {
        let sigma = rng.gen_range(0.1..=0.5) * 255.0;
        gaussian_noise_mut(&mut rgb, 0.0, sigma, rng.gen());
    }
    if rng.gen_bool(probs.hflip) {
        imageops::flip_horizontal_in_place(&mut rgb);
    }
    Ok(rgb)
}

/// Crops a random region covering 60-100% of the area (aspect 3:4 to 4:3) and resizes it.
pub fn random_resized_crop<R: Rng>(img: &RgbImage, size: u32, rng: &mut R) -> RgbImage {
    let (w, h) = img.dimensions();
    let area = (w as f64) * (h as f64);
    for _ in 0..10 {
        let target_area = area * rng.gen_range(0.6..=1.0);
        let log_ratio = rng.gen_range((3.0f64 / 4.0).ln()..=(4.0f64 / 3.0).ln());
        let ratio = log_ratio.exp();
        let cw = (target_area * ratio).sqrt().round() as u32;
        let ch = (target_area / ratio).sqrt().round() as u32;
        if cw > 0 && ch > 0 && cw <= w && ch <= h {
            let x = rng.gen_range(0..=w - cw);
            let y = rng.gen_range(0..=h - ch);
            let crop = imageops::crop_imm(img, x, y, cw, ch).to_image();
            return imageops::resize(&crop, size, size, FilterType::Triangle);
        }
    }
    // fall back to the whole image
    imageops::resize(img, size, size, FilterType::Triangle)
}

/// Rotates about the centre with bilinear sampling; uncovered pixels are black.
pub fn rotate(img: &RgbImage, degrees: f32) -> RgbImage {
    rotate_about_center(img, degrees.to_radians(), Interpolation::Bilinear, Rgb([0, 0, 0]))
}

pub fn rgb_shift(img: &mut RgbImage, shift: [i16; 3]) {
    for px in img.pixels_mut() {
        for (value, delta) in px.0.iter_mut().zip(shift) {
            *value = (*value as i16 + delta).clamp(0, 255) as u8;
        }
    }
}

fn jpeg_roundtrip(img: &RgbImage, quality: u8) -> Result<RgbImage> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        .map_err(PrepError::from)?;
    let decoded = image::load_from_memory(buffer.get_ref()).map_err(PrepError::from)?;
    Ok(decoded.to_rgb8())
}

fn augment_file(src: &Path, dest: &Path, options: &AugmentOptions) -> Result<()> {
    let img = image::open(src).with_context(|| format!("Failed to decode {:?}", src))?;
    let mut rng = rng_for_file(options.seed, src);
    let out = augment_image(&img, &options.probabilities, &mut rng)?;
    batch::save_image(&DynamicImage::ImageRgb8(out), dest, 95)
}

/// Augments every image in each class folder of `train_root`.
pub fn run(train_root: &Path, options: &AugmentOptions) -> Result<BTreeMap<String, BatchCounts>> {
    if !train_root.is_dir() {
        return Err(PrepError::MissingInput(train_root.to_path_buf()).into());
    }

    let mut report = BTreeMap::new();
    for class_dir in batch::subdirectories(train_root)? {
        let class = batch::file_name_str(&class_dir);
        let out_dir = options
            .output
            .as_ref()
            .map(|o| o.join(&class))
            .unwrap_or_else(|| class_dir.clone());

        let results: Vec<bool> = batch::list_images(&class_dir)?
            .par_iter()
            .map(|src| {
                let dest = out_dir.join(batch::file_name_str(src));
                augment_file(src, &dest, options)
                    .map_err(|e| tracing::warn!(file = %src.display(), error = %e, "augmentation failed"))
                    .is_ok()
            })
            .collect();

        let counts = BatchCounts {
            processed: results.iter().filter(|ok| **ok).count(),
            skipped: results.iter().filter(|ok| !**ok).count(),
        };
        tracing::info!(class = %class, processed = counts.processed, "class augmented");
        report.insert(class, counts);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128]))
    }

    #[test]
    fn per_file_rng_depends_on_seed_and_path() {
        let a: u64 = rng_for_file(Some(1), Path::new("a.png")).gen();
        let a2: u64 = rng_for_file(Some(1), Path::new("a.png")).gen();
        let b: u64 = rng_for_file(Some(1), Path::new("b.png")).gen();
        let c: u64 = rng_for_file(Some(2), Path::new("a.png")).gen();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn all_steps_enabled_produce_crop_size() {
        let probs = AugmentProbabilities {
            resized_crop: 1.0,
            rotate90: 1.0,
            rotate: 1.0,
            rgb_shift: 1.0,
            jpeg: 1.0,
            blur: 1.0,
            noise: 1.0,
            hflip: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let out = augment_image(&DynamicImage::ImageRgb8(gradient(100, 80)), &probs, &mut rng)
            .expect("augment");
        assert_eq!(out.dimensions(), (CROP_SIZE, CROP_SIZE));
    }

    #[test]
    fn disabled_pipeline_is_identity() {
        let probs = AugmentProbabilities {
            resized_crop: 0.0,
            rotate90: 0.0,
            rotate: 0.0,
            rgb_shift: 0.0,
            jpeg: 0.0,
            blur: 0.0,
            noise: 0.0,
            hflip: 0.0,
        };
        let src = gradient(30, 20);
        let mut rng = StdRng::seed_from_u64(7);
        let out = augment_image(&DynamicImage::ImageRgb8(src.clone()), &probs, &mut rng)
            .expect("augment");
        assert_eq!(out, src);
    }

    #[test]
    fn rotation_keeps_size_and_fills_corners_black() {
        let src = RgbImage::from_pixel(21, 15, Rgb([180, 180, 180]));
        let out = rotate(&src, 30.0);
        assert_eq!(out.dimensions(), src.dimensions());
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(10, 7), &Rgb([180, 180, 180]));

        let same = rotate(&gradient(9, 7), 0.0);
        assert_eq!(same.get_pixel(4, 3), gradient(9, 7).get_pixel(4, 3));
    }

    #[test]
    fn rgb_shift_saturates() {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([250, 5, 100]));
        rgb_shift(&mut img, [25, -25, 10]);
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 0, 110]));
    }

    #[test]
    fn run_writes_to_output_when_given() {
        let dir = tempdir().expect("tempdir");
        let train = dir.path().join("train");
        std::fs::create_dir_all(train.join("pelve")).expect("mkdir");
        DynamicImage::ImageRgb8(gradient(32, 32))
            .save(train.join("pelve/a.png"))
            .expect("save");

        let out = dir.path().join("aug");
        let options = AugmentOptions {
            seed: Some(3),
            output: Some(out.clone()),
            ..AugmentOptions::default()
        };
        let report = run(&train, &options).expect("run");
        assert_eq!(report["pelve"].processed, 1);
        assert!(out.join("pelve/a.png").exists());
    }
}
