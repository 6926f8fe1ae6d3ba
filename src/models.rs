//
// models.rs
// IML-Prep
//
// Serializable run summaries printed by the CLI and written with --report.
//

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::SkipReason;

/// Outcome of one DICOM file in the PNG pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Converted { saved: usize, rejected: usize },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionSummary {
    pub files_scanned: usize,
    pub images_saved: usize,
    pub frames_rejected: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl ConversionSummary {
    pub fn record(&mut self, outcome: FileOutcome) {
        self.files_scanned += 1;
        match outcome {
            FileOutcome::Converted { saved, rejected } => {
                self.images_saved += saved;
                self.frames_rejected += rejected;
            }
            FileOutcome::Skipped(reason) => *self.skipped.entry(reason).or_default() += 1,
        }
    }

    pub fn merge(mut self, other: ConversionSummary) -> Self {
        self.files_scanned += other.files_scanned;
        self.images_saved += other.images_saved;
        self.frames_rejected += other.frames_rejected;
        for (reason, count) in other.skipped {
            *self.skipped.entry(reason).or_default() += count;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesSummary {
    pub series: usize,
    pub transversal: usize,
    #[serde(rename = "3d")]
    pub volume_3d: usize,
    pub failed: usize,
}

impl SeriesSummary {
    pub fn total(&self) -> usize {
        self.transversal + self.volume_3d
    }
}

/// Per-class file counts of a train/val/test split.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassSplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
    /// Files that could not be copied into their split.
    pub skipped: usize,
}

/// One manifest row of a patient-level split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRow {
    pub class: String,
    pub patient: String,
    pub split: String,
    pub num_images: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PatientSplitSummary {
    pub total_images: usize,
    /// split -> class -> image count
    pub per_split: BTreeMap<String, BTreeMap<String, usize>>,
    pub manifest: Vec<ManifestRow>,
    /// Images that could not be linked or copied into their split.
    pub skipped: usize,
}

/// Files placed per `<group>_<region>` class folder, mirrors included.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrganizeSummary {
    pub placed: BTreeMap<String, usize>,
    pub skipped: usize,
}

/// Processed/skipped counts for the plain per-directory batch commands.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchCounts {
    pub processed: usize,
    pub skipped: usize,
}

pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("Failed to write report {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_summary_accumulates_outcomes() {
        let mut a = ConversionSummary::default();
        a.record(FileOutcome::Converted { saved: 3, rejected: 1 });
        a.record(FileOutcome::Skipped(SkipReason::Localizer));

        let mut b = ConversionSummary::default();
        b.record(FileOutcome::Skipped(SkipReason::Localizer));
        b.record(FileOutcome::Skipped(SkipReason::NonImage));

        let merged = a.merge(b);
        assert_eq!(merged.files_scanned, 4);
        assert_eq!(merged.images_saved, 3);
        assert_eq!(merged.frames_rejected, 1);
        assert_eq!(merged.skipped[&SkipReason::Localizer], 2);
        assert_eq!(merged.skipped[&SkipReason::NonImage], 1);
    }

    #[test]
    fn summary_serializes_reason_keys() {
        let mut summary = ConversionSummary::default();
        summary.record(FileOutcome::Skipped(SkipReason::PixelDecode));
        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["skipped"]["pixel_decode"], 1);
    }
}
