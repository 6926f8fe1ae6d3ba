//
// quality.rs
// IML-Prep
//
// Intensity/entropy/contrast/variance gate that discards near-empty or uniform frames.
//

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Luma threshold under which a pixel counts as black.
pub const BLACK_LEVEL: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_nonblack_pct: f64,
    pub min_entropy: f64,
    pub min_p2p: u8,
    pub min_var: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_nonblack_pct: 0.05,
            min_entropy: 1.5,
            min_p2p: 10,
            min_var: 50.0,
        }
    }
}

/// Measured values for one 8-bit frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub nonblack: f64,
    pub entropy: f64,
    pub contrast: u8,
    pub variance: f64,
}

impl QualityMetrics {
    pub fn measure(img: &DynamicImage) -> Self {
        let gray = luma(img);
        Self {
            nonblack: nonblack(&gray, BLACK_LEVEL),
            entropy: entropy(&gray),
            contrast: contrast(&gray),
            variance: variance(img.as_bytes()),
        }
    }

    pub fn passes(&self, thresholds: &QualityThresholds) -> bool {
        self.nonblack >= thresholds.min_nonblack_pct
            && self.entropy >= thresholds.min_entropy
            && self.contrast >= thresholds.min_p2p
            && self.variance >= thresholds.min_var
    }
}

/// Gray values of an 8-bit image; RGB is reduced with truncating BT.601 weights.
pub fn luma(img: &DynamicImage) -> Vec<u8> {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.as_raw().clone(),
        other => other
            .to_rgb8()
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) as u8
            })
            .collect(),
    }
}

pub fn entropy(gray: &[u8]) -> f64 {
    if gray.is_empty() {
        return 0.0;
    }
    let mut hist = [0u64; 256];
    for &v in gray {
        hist[v as usize] += 1;
    }
    let total = gray.len() as f64;
    hist.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub fn nonblack(gray: &[u8], threshold: u8) -> f64 {
    if gray.is_empty() {
        return 0.0;
    }
    let bright = gray.iter().filter(|&&v| v > threshold).count();
    bright as f64 / gray.len() as f64
}

pub fn contrast(gray: &[u8]) -> u8 {
    match (gray.iter().min(), gray.iter().max()) {
        (Some(lo), Some(hi)) => hi - lo,
        _ => 0,
    }
}

/// Population variance over every sample (all channels).
pub fn variance(samples: &[u8]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n;
    samples
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}
