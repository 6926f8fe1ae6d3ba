//
// organize.rs
// IML-Prep
//
// Regroups `<group>/<file>` images into `<group>_<region>/` class folders, where the region is
// encoded as the last character of the file stem.
//

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::batch::{self, TransferMode};
use crate::error::PrepError;
use crate::models::OrganizeSummary;
use crate::transform;

pub const MIRROR_SUFFIX: &str = "_espelhado";

/// Region from the final stem character: `a`/`b` are skull views, `c` is pelvis.
pub fn region_for(path: &Path) -> Option<&'static str> {
    let stem = path.file_stem()?.to_str()?;
    match stem.chars().last()?.to_ascii_lowercase() {
        'a' | 'b' => Some("cranio"),
        'c' => Some("pelve"),
        _ => None,
    }
}

pub fn mirrored_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, MIRROR_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, MIRROR_SUFFIX),
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrganizeOptions {
    pub mode: TransferMode,
    /// Region whose files also get a horizontally mirrored copy.
    pub mirror: Option<String>,
}

/// Places every region-tagged image; a file that fails is warned about, counted and skipped.
pub fn run(input: &Path, output: &Path, options: &OrganizeOptions) -> Result<OrganizeSummary> {
    if !input.is_dir() {
        return Err(PrepError::MissingInput(input.to_path_buf()).into());
    }

    let mut summary = OrganizeSummary::default();
    for group_dir in batch::subdirectories(input)? {
        let group = batch::file_name_str(&group_dir);
        for file in batch::list_images(&group_dir)? {
            let Some(region) = region_for(&file) else {
                tracing::debug!(file = %file.display(), "no region suffix, left in place");
                continue;
            };
            let class = format!("{}_{}", group, region);
            match organize_file(&file, &output.join(&class), region, options) {
                Ok(written) => *summary.placed.entry(class).or_default() += written,
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "organize failed, skipping");
                    summary.skipped += 1;
                }
            }
        }
    }

    for (class, count) in &summary.placed {
        tracing::info!(class = %class, files = count, "organized");
    }
    Ok(summary)
}

/// Number of files written into `dest_dir` for one source image.
fn organize_file(
    file: &Path,
    dest_dir: &Path,
    region: &str,
    options: &OrganizeOptions,
) -> Result<usize> {
    let mut written = 0;
    // Mirror before a move takes the source away.
    if options.mirror.as_deref() == Some(region) {
        write_mirror(file, &dest_dir.join(mirrored_name(file)))?;
        written += 1;
    }

    let dest: PathBuf = dest_dir.join(batch::file_name_str(file));
    batch::place_file(file, &dest, options.mode)
        .with_context(|| format!("Failed to place {:?} at {:?}", file, dest))?;
    Ok(written + 1)
}

fn write_mirror(src: &Path, dest: &Path) -> Result<()> {
    let img = image::open(src).with_context(|| format!("Failed to decode {:?}", src))?;
    batch::save_image(&transform::mirror(&img), dest, 95)
}
