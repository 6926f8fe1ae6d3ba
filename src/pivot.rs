//
// pivot.rs
// IML-Prep
//
// Copies a window of neighbouring slices around each listed pivot image, keeping the relative
// directory layout of the slice tree.
//

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;

use crate::batch;
use crate::naming::natural_key;

pub const DEFAULT_RADIUS: usize = 10;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum WindowMode {
    /// Wraps around the ends of the directory listing.
    #[default]
    Circular,
    /// Truncates at the first and last file.
    Clamped,
}

#[derive(Debug, Clone)]
pub struct PivotOptions {
    pub radius: usize,
    pub mode: WindowMode,
    /// Only files with one of these extensions (lower-case, no dot) are listed.
    pub extensions: BTreeSet<String>,
}

impl Default for PivotOptions {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            mode: WindowMode::Circular,
            extensions: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PivotSummary {
    pub pivots: usize,
    pub missing: usize,
    pub copied: usize,
    pub already_present: usize,
    /// Pivots whose window could not be listed or copied.
    pub failed: usize,
}

/// Matches the first `/<anchor>/` of a line and captures the anchor itself.
pub fn anchor_regex(anchors: &[String]) -> Result<Option<Regex>> {
    if anchors.is_empty() {
        return Ok(None);
    }
    let alternatives: Vec<String> = anchors.iter().map(|a| regex::escape(a)).collect();
    let re = Regex::new(&format!("/({})/", alternatives.join("|")))
        .context("Failed to build anchor pattern")?;
    Ok(Some(re))
}

/// Parses one pivot line; `None` when it is blank, a comment or lacks an anchor.
pub fn parse_pivot_line(line: &str, anchors: Option<&Regex>) -> Option<String> {
    let line = line.trim().trim_end_matches(',').trim_end();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match anchors {
        None => Some(line.to_string()),
        Some(re) => match re.captures(line).and_then(|c| c.get(1)) {
            Some(m) => Some(line[m.start()..].to_string()),
            None => {
                tracing::warn!(line, "pivot without anchor directory, skipping");
                None
            }
        },
    }
}

pub fn load_pivots(list: &Path, anchors: &[String]) -> Result<Vec<String>> {
    let text =
        fs::read_to_string(list).with_context(|| format!("Failed to read pivot list {:?}", list))?;
    let re = anchor_regex(anchors)?;
    Ok(text
        .lines()
        .filter_map(|line| parse_pivot_line(line, re.as_ref()))
        .collect())
}

/// Indices of the window around `index` in a listing of `len` files.
pub fn window_indices(index: usize, len: usize, radius: usize, mode: WindowMode) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    match mode {
        WindowMode::Circular => {
            let (i, n, r) = (index as i64, len as i64, radius as i64);
            (-r..=r).map(|j| (i + j).rem_euclid(n) as usize).collect()
        }
        WindowMode::Clamped => {
            let start = index.saturating_sub(radius);
            let end = (index + radius + 1).min(len);
            (start..end).collect()
        }
    }
}

fn listing(dir: &Path, extensions: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if !extensions.is_empty() {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !extensions.contains(&ext) {
                continue;
            }
        }
        names.push(batch::file_name_str(&path));
    }
    names.sort_by_cached_key(|n| natural_key(n));
    Ok(names)
}

pub fn copy_windows(
    base: &Path,
    output: &Path,
    pivots: &[String],
    options: &PivotOptions,
) -> Result<PivotSummary> {
    fs::create_dir_all(output).with_context(|| format!("Failed to create {:?}", output))?;
    let mut summary = PivotSummary {
        pivots: pivots.len(),
        ..PivotSummary::default()
    };

    for pivot in pivots {
        if let Err(e) = copy_window(base, output, pivot, options, &mut summary) {
            tracing::warn!(pivot = %pivot, error = %e, "pivot window failed, skipping");
            summary.failed += 1;
        }
    }

    Ok(summary)
}

fn copy_window(
    base: &Path,
    output: &Path,
    pivot: &str,
    options: &PivotOptions,
    summary: &mut PivotSummary,
) -> Result<()> {
    let target: PathBuf = base.join(pivot);
    if !target.exists() {
        tracing::warn!(pivot = %target.display(), "pivot not found");
        summary.missing += 1;
        return Ok(());
    }
    let Some(dir) = target.parent() else {
        summary.missing += 1;
        return Ok(());
    };
    let name = batch::file_name_str(&target);
    let files = listing(dir, &options.extensions)?;
    let Some(index) = files.iter().position(|f| *f == name) else {
        tracing::warn!(pivot = %name, dir = %dir.display(), "pivot not in filtered listing");
        summary.missing += 1;
        return Ok(());
    };

    let rel = dir.strip_prefix(base).unwrap_or(Path::new(""));
    let out_dir = output.join(rel);
    fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {:?}", out_dir))?;

    let window = window_indices(index, files.len(), options.radius, options.mode);
    for idx in &window {
        let dest = out_dir.join(&files[*idx]);
        if dest.exists() {
            summary.already_present += 1;
            continue;
        }
        fs::copy(dir.join(&files[*idx]), &dest)
            .with_context(|| format!("Failed to copy into {:?}", dest))?;
        summary.copied += 1;
    }
    tracing::info!(pivot = %name, dir = %dir.display(), window = window.len(), "window copied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lines_are_cleaned_and_reanchored() {
        let re = anchor_regex(&["Masculino".to_string(), "Feminino".to_string()])
            .expect("regex");
        let re = re.as_ref();
        assert_eq!(
            parse_pivot_line("  /mnt/x/Feminino/26F/IM10.png, ", re),
            Some("Feminino/26F/IM10.png".to_string())
        );
        assert_eq!(parse_pivot_line("# comment", re), None);
        assert_eq!(parse_pivot_line("   ", re), None);
        assert_eq!(parse_pivot_line("/mnt/x/Other/IM1.png", re), None);
        assert_eq!(
            parse_pivot_line("a/b.png,", None),
            Some("a/b.png".to_string())
        );
    }

    #[test]
    fn circular_window_wraps() {
        assert_eq!(window_indices(0, 5, 2, WindowMode::Circular), vec![3, 4, 0, 1, 2]);
        assert_eq!(window_indices(4, 5, 1, WindowMode::Circular), vec![3, 4, 0]);
    }

    #[test]
    fn clamped_window_truncates() {
        assert_eq!(window_indices(0, 5, 2, WindowMode::Clamped), vec![0, 1, 2]);
        assert_eq!(window_indices(3, 5, 2, WindowMode::Clamped), vec![1, 2, 3, 4]);
        assert!(window_indices(0, 0, 2, WindowMode::Clamped).is_empty());
    }

    #[test]
    fn copies_naturally_sorted_neighbours() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path().join("slices");
        let series = base.join("Masculino/30M");
        fs::create_dir_all(&series).expect("mkdir");
        for i in [1, 2, 3, 10, 11] {
            fs::write(series.join(format!("IM{}.png", i)), b"x").expect("write");
        }
        fs::write(series.join("notes.txt"), b"x").expect("write");

        let out = dir.path().join("out");
        let options = PivotOptions {
            radius: 1,
            mode: WindowMode::Clamped,
            extensions: ["png".to_string()].into_iter().collect(),
        };
        let pivots = vec!["Masculino/30M/IM3.png".to_string(), "Masculino/30M/IM99.png".to_string()];
        let summary = copy_windows(&base, &out, &pivots, &options).expect("copy");

        assert_eq!(summary.copied, 3);
        assert_eq!(summary.missing, 1);
        for name in ["IM2.png", "IM3.png", "IM10.png"] {
            assert!(out.join("Masculino/30M").join(name).exists(), "{}", name);
        }
        assert!(!out.join("Masculino/30M/IM11.png").exists());

        let again = copy_windows(&base, &out, &pivots[..1], &options).expect("copy");
        assert_eq!(again.copied, 0);
        assert_eq!(again.already_present, 3);
    }

    #[test]
    fn failing_pivot_does_not_stop_the_others() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path().join("slices");
        for series in ["Masculino/30M", "Feminino/40F"] {
            fs::create_dir_all(base.join(series)).expect("mkdir");
            for i in 1..=3 {
                fs::write(base.join(series).join(format!("IM{}.png", i)), b"x").expect("write");
            }
        }

        // a plain file where the first pivot's output directory should go
        let out = dir.path().join("out");
        fs::create_dir_all(&out).expect("mkdir");
        fs::write(out.join("Masculino"), b"blocker").expect("write");

        let options = PivotOptions {
            radius: 1,
            ..PivotOptions::default()
        };
        let pivots = vec!["Masculino/30M/IM2.png".to_string(), "Feminino/40F/IM2.png".to_string()];
        let summary = copy_windows(&base, &out, &pivots, &options).expect("copy");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.copied, 3);
        assert!(out.join("Feminino/40F/IM3.png").exists());
    }
}
