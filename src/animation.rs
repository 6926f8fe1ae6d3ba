//
// animation.rs
// IML-Prep
//
// Builds one looping GIF per image folder so a class (e.g. a set of heatmaps) can be reviewed
// at a glance.
//

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{imageops, Delay, Frame, Rgba, RgbaImage};

use crate::batch;
use crate::error::PrepError;

pub const DEFAULT_FRAME_MS: u32 = 100;
const GIF_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct GifOptions {
    pub frame_ms: u32,
    pub background: [u8; 3],
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            frame_ms: DEFAULT_FRAME_MS,
            background: [0, 0, 0],
        }
    }
}

/// `Cranio Masculino` -> `cranio_masculino.gif`
pub fn gif_name(folder: &str) -> String {
    format!("{}.gif", folder.replace(' ', "_").to_lowercase())
}

fn gif_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(batch::list_images(dir)?
        .into_iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| GIF_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect())
}

/// Writes the images of `dir` (sorted by name) as an infinitely looping GIF.
pub fn folder_to_gif(dir: &Path, target: &Path, options: &GifOptions) -> Result<usize> {
    let files = gif_inputs(dir)?;
    if files.is_empty() {
        return Err(PrepError::NoImages(dir.to_path_buf()).into());
    }

    let images = files
        .iter()
        .map(|f| {
            image::open(f)
                .map(|img| img.to_rgba8())
                .with_context(|| format!("Failed to decode {:?}", f))
        })
        .collect::<Result<Vec<_>>>()?;

    let max_w = images.iter().map(|i| i.width()).max().unwrap_or(1);
    let max_h = images.iter().map(|i| i.height()).max().unwrap_or(1);
    tracing::debug!(dir = %dir.display(), max_w, max_h, frames = images.len(), "gif canvas");

    let [r, g, b] = options.background;
    let delay = Delay::from_numer_denom_ms(options.frame_ms, 1);
    let frames = images.iter().map(|img| {
        let mut canvas = RgbaImage::from_pixel(max_w, max_h, Rgba([r, g, b, 255]));
        let left = (max_w - img.width()) / 2;
        let top = (max_h - img.height()) / 2;
        imageops::overlay(&mut canvas, img, left as i64, top as i64);
        Frame::from_parts(canvas, 0, 0, delay)
    });

    let file = File::create(target).with_context(|| format!("Failed to create {:?}", target))?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder.set_repeat(Repeat::Infinite)?;
    encoder
        .encode_frames(frames)
        .with_context(|| format!("Failed to encode {:?}", target))?;
    Ok(images.len())
}

/// One GIF per folder, written next to the folders in `base`. All subfolders when `folders` is empty.
pub fn run(base: &Path, folders: &[String], options: &GifOptions) -> Result<Vec<PathBuf>> {
    if !base.is_dir() {
        return Err(PrepError::MissingInput(base.to_path_buf()).into());
    }
    let folders: Vec<String> = if folders.is_empty() {
        batch::subdirectories(base)?
            .iter()
            .map(|d| batch::file_name_str(d))
            .collect()
    } else {
        folders.to_vec()
    };

    let mut written = Vec::new();
    for folder in &folders {
        let dir = base.join(folder);
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "folder not found, skipping");
            continue;
        }
        let target = base.join(gif_name(folder));
        match folder_to_gif(&dir, &target, options) {
            Ok(frames) => {
                tracing::info!(gif = %target.display(), frames, "gif written");
                written.push(target);
            }
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "gif skipped"),
        }
    }
    Ok(written)
}
