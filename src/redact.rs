//
// redact.rs
// IML-Prep
//
// Visual anonymization: burns a black square over the corner where scanners print patient
// annotations and flattens each input directory into one output folder.
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use crate::batch;
use crate::models::BatchCounts;
use crate::transform;

pub const DEFAULT_SQUARE: u32 = 50;

#[derive(Debug, Clone)]
pub struct RedactOptions {
    pub square: u32,
    pub folder_pattern: Option<Regex>,
    /// Empty the whole output directory before the first input is processed.
    pub clean: bool,
}

impl Default for RedactOptions {
    fn default() -> Self {
        Self {
            square: DEFAULT_SQUARE,
            folder_pattern: None,
            clean: false,
        }
    }
}

/// `<parent dir name>_<file name>`, keeping images from different studies apart once flattened.
pub fn redacted_name(image: &Path) -> String {
    let parent = image
        .parent()
        .map(batch::file_name_str)
        .unwrap_or_default();
    format!("{}_{}", parent, batch::file_name_str(image))
}

fn parent_matches(image: &Path, pattern: Option<&Regex>) -> bool {
    match pattern {
        None => true,
        Some(re) => image
            .parent()
            .map(|p| re.is_match(&batch::file_name_str(p)))
            .unwrap_or(false),
    }
}

pub fn redact_dir(input: &Path, out_dir: &Path, options: &RedactOptions) -> Result<BatchCounts> {
    std::fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;

    let mut counts = BatchCounts::default();
    for image in batch::collect_images(input) {
        if !parent_matches(&image, options.folder_pattern.as_ref()) {
            continue;
        }
        let target = out_dir.join(redacted_name(&image));
        let result = image::open(&image)
            .with_context(|| format!("Failed to decode {:?}", image))
            .and_then(|mut img| {
                transform::black_square(&mut img, options.square);
                batch::save_image(&img, &target, 95)
            });
        match result {
            Ok(()) => counts.processed += 1,
            Err(e) => {
                tracing::warn!(file = %image.display(), error = %e, "redaction failed");
                counts.skipped += 1;
            }
        }
    }
    Ok(counts)
}

/// Redacts every input directory into `output/<input dir name>/`.
pub fn run(
    inputs: &[PathBuf],
    output: &Path,
    options: &RedactOptions,
) -> Result<BTreeMap<String, BatchCounts>> {
    let existing: Vec<&PathBuf> = inputs
        .iter()
        .filter(|input| {
            let found = input.is_dir();
            if !found {
                tracing::warn!(dir = %input.display(), "input directory not found, skipping");
            }
            found
        })
        .collect();
    if options.clean && !existing.is_empty() {
        batch::clean_dir(output)?;
    }

    let mut report = BTreeMap::new();
    for input in existing {
        let name = batch::file_name_str(input);
        let counts = redact_dir(input, &output.join(&name), options)?;
        tracing::info!(dir = %name, processed = counts.processed, skipped = counts.skipped, "redacted");
        report.insert(name, counts);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn names_carry_the_parent_folder() {
        assert_eq!(redacted_name(Path::new("/in/Cranio/26F/IMG1.png")), "26F_IMG1.png");
    }

    #[test]
    fn folder_pattern_filters_on_parent_name() {
        let re = Regex::new(r"^\d+F$").expect("regex");
        assert!(parent_matches(Path::new("/x/26F/a.png"), Some(&re)));
        assert!(!parent_matches(Path::new("/x/26M/a.png"), Some(&re)));
        assert!(parent_matches(Path::new("/x/26M/a.png"), None));
    }

    #[test]
    fn redact_dir_blackens_corner_and_flattens() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("Feminino");
        let nested = input.join("P01");
        std::fs::create_dir_all(&nested).expect("mkdir");
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(80, 60, Rgb([200, 200, 200])));
        img.save(nested.join("a.png")).expect("save");
        std::fs::write(nested.join("notes.txt"), b"x").expect("write");

        let out = dir.path().join("out");
        let report = run(&[input, dir.path().join("missing")], &out, &RedactOptions::default())
            .expect("run");
        assert_eq!(report["Feminino"].processed, 1);
        assert!(!report.contains_key("missing"));

        let saved = image::open(out.join("Feminino/P01_a.png")).expect("open");
        assert_eq!(saved.get_pixel(79, 0).0[..3], [0, 0, 0]);
        assert_eq!(saved.get_pixel(0, 59).0[..3], [200, 200, 200]);
    }

    #[test]
    fn clean_empties_the_whole_output_once() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("Pelve");
        std::fs::create_dir_all(input.join("30M")).expect("mkdir");
        DynamicImage::new_rgb8(8, 8)
            .save(input.join("30M/a.png"))
            .expect("save");

        let output = dir.path().join("out");
        std::fs::create_dir_all(output.join("Stale")).expect("mkdir");
        std::fs::write(output.join("Stale/old.png"), b"x").expect("write");

        let options = RedactOptions {
            clean: true,
            ..RedactOptions::default()
        };
        let missing = dir.path().join("Cranio");
        let report = run(&[missing, input], &output, &options).expect("run");

        assert_eq!(report["Pelve"].processed, 1);
        assert!(!output.join("Stale").exists());
        assert!(output.join("Pelve/30M_a.png").exists());
    }

    #[test]
    fn clean_is_skipped_when_no_input_exists() {
        let dir = tempdir().expect("tempdir");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&output).expect("mkdir");
        std::fs::write(output.join("keep.png"), b"x").expect("write");

        let options = RedactOptions {
            clean: true,
            ..RedactOptions::default()
        };
        let report = run(&[dir.path().join("typo")], &output, &options).expect("run");
        assert!(report.is_empty());
        assert!(output.join("keep.png").exists());
    }
}
