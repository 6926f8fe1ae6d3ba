//
// pixels.rs
// IML-Prep
//
// Decodes DICOM pixel data into float frames (rescale, VOI window, MONOCHROME1 inversion) and
// normalizes frames into 8-bit images.
//

use anyhow::{Context, Result};
use clap::ValueEnum;
use dicom::object::DefaultDicomObject;
use dicom::pixeldata::PixelDecoder;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, VoiLutOption};
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use ndarray::{s, Array3, Array4, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::dicom_access::{ElementAccess, PHOTOMETRIC_INTERPRETATION, WINDOW_CENTER, WINDOW_WIDTH};
use crate::error::PrepError;

/// Which frames of a multi-frame instance are exported.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSelection {
    First,
    Middle,
    Last,
    #[default]
    All,
}

impl FrameSelection {
    /// Frame indices to export out of `count`.
    pub fn indices(self, count: usize) -> Vec<usize> {
        if count == 0 {
            return Vec::new();
        }
        match self {
            FrameSelection::First => vec![0],
            FrameSelection::Middle => vec![count / 2],
            FrameSelection::Last => vec![count - 1],
            FrameSelection::All => (0..count).collect(),
        }
    }
}

/// Decoded pixel values in (frames, rows, columns, samples) order.
pub fn load_frames(obj: &DefaultDicomObject) -> Result<Array4<f32>> {
    let decoded = obj
        .decode_pixel_data()
        .context("Failed to decode pixel data")?;

    // Rescale slope/intercept only; windowing is done below so a bad VOI never fails the frame.
    let options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::Default)
        .with_voi_lut(VoiLutOption::Identity);
    let mut frames = decoded
        .to_ndarray_with_options::<f32>(&options)
        .context("Failed to convert pixel data to an array")?;

    if let Some((center, width)) = window_from(obj) {
        apply_window(&mut frames, center, width);
    }

    let monochrome1 = obj
        .element_str(PHOTOMETRIC_INTERPRETATION)
        .map(|p| p.eq_ignore_ascii_case("MONOCHROME1"))
        .unwrap_or(false);
    if monochrome1 {
        let max = frames.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        frames.mapv_inplace(|v| max - v);
    }

    Ok(frames)
}

fn window_from<T: ElementAccess>(obj: &T) -> Option<(f64, f64)> {
    let center = obj.element_f64s(WINDOW_CENTER)?.first().copied()?;
    let width = obj.element_f64s(WINDOW_WIDTH)?.first().copied()?;
    (width >= 1.0).then_some((center, width))
}

/// Linear VOI window onto [0, 255].
pub fn apply_window(frames: &mut Array4<f32>, center: f64, width: f64) {
    let lower = center - 0.5 - (width - 1.0) / 2.0;
    let upper = center - 0.5 + (width - 1.0) / 2.0;
    let span = (width - 1.0).max(f64::EPSILON);
    frames.mapv_inplace(|v| {
        let x = v as f64;
        let y = if x <= lower {
            0.0
        } else if x > upper {
            255.0
        } else {
            ((x - (center - 0.5)) / span + 0.5) * 255.0
        };
        y as f32
    });
}

/// Copies one frame out as (rows, columns, samples).
pub fn frame(frames: &Array4<f32>, index: usize) -> Array3<f32> {
    frames.index_axis(Axis(0), index).to_owned()
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(sorted: &[f32], q: f64) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn scale_channel(channel: ArrayView2<f32>) -> Vec<u8> {
    let mut sorted: Vec<f32> = channel.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut lo = percentile(&sorted, 2.0);
    let mut hi = percentile(&sorted, 98.0);
    if hi <= lo {
        lo = sorted.first().copied().unwrap_or(0.0);
        hi = sorted.last().copied().unwrap_or(0.0);
    }
    if hi <= lo {
        hi = lo + 1.0;
    }

    channel
        .iter()
        .map(|&x| {
            let y = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
            (y * 255.0 + 0.5) as u8
        })
        .collect()
}

/// Robust 2nd/98th percentile stretch of each channel into 8 bits.
pub fn to_uint8(frame: &Array3<f32>) -> crate::error::Result<DynamicImage> {
    let (rows, cols, samples) = frame.dim();
    let (w, h) = (cols as u32, rows as u32);
    match samples {
        1 => {
            let data = scale_channel(frame.slice(s![.., .., 0]));
            GrayImage::from_raw(w, h, data)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| PrepError::UnsupportedLayout(format!("{}x{} gray", w, h)))
        }
        3 | 4 => {
            let channels: Vec<Vec<u8>> = (0..3)
                .map(|c| scale_channel(frame.slice(s![.., .., c])))
                .collect();
            let mut data = Vec::with_capacity(rows * cols * 3);
            for i in 0..rows * cols {
                data.extend(channels.iter().map(|ch| ch[i]));
            }
            RgbImage::from_raw(w, h, data)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| PrepError::UnsupportedLayout(format!("{}x{} rgb", w, h)))
        }
        other => Err(PrepError::UnsupportedLayout(format!(
            "{} samples per pixel",
            other
        ))),
    }
}

/// Replicates a gray image into three channels when `force` is set.
pub fn ensure_rgb(img: DynamicImage, force: bool) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_) if force => DynamicImage::ImageRgb8(img.to_rgb8()),
        other => other,
    }
}

/// Shrinks so the longer side equals `max_size`; `0` disables.
pub fn resize_if_needed(img: DynamicImage, max_size: u32) -> DynamicImage {
    let longest = img.width().max(img.height());
    if max_size == 0 || longest <= max_size {
        return img;
    }
    let scale = max_size as f64 / longest as f64;
    let w = ((img.width() as f64 * scale).round() as u32).max(1);
    let h = ((img.height() as f64 * scale).round() as u32).max(1);
    img.resize_exact(w, h, FilterType::Triangle)
}
