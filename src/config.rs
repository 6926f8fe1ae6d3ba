//
// config.rs
// IML-Prep
//
// YAML-backed settings for the DICOM to PNG pipeline; CLI flags override file values.
//

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::naming::SplitBy;
use crate::pixels::FrameSelection;
use crate::quality::QualityThresholds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub split_by: SplitBy,
    pub drop_localizer: bool,
    pub drop_derived: bool,
    pub clahe: bool,
    pub frames: FrameSelection,
    /// Longest output side; 0 keeps the native size.
    pub max_size: u32,
    pub workers: usize,
    #[serde(flatten)]
    pub quality: QualityThresholds,
    /// Force three-channel output even for monochrome sources.
    pub rgb: bool,
    /// Comma separated modality whitelist; empty accepts every modality.
    pub only_mods: String,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            split_by: SplitBy::Series,
            drop_localizer: true,
            drop_derived: false,
            clahe: true,
            frames: FrameSelection::All,
            max_size: 1024,
            workers: 4,
            quality: QualityThresholds::default(),
            rgb: true,
            only_mods: String::new(),
        }
    }
}

impl ConvertConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn validate(&self) -> std::result::Result<(), PrepError> {
        if self.workers == 0 {
            return Err(PrepError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.quality.min_nonblack_pct) {
            return Err(PrepError::InvalidConfig(format!(
                "min_nonblack_pct must be within [0, 1], got {}",
                self.quality.min_nonblack_pct
            )));
        }
        Ok(())
    }

    /// Upper-cased modality whitelist; `None` when every modality is accepted.
    pub fn modality_filter(&self) -> Option<BTreeSet<String>> {
        let mods: BTreeSet<String> = self
            .only_mods
            .split(',')
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        (!mods.is_empty()).then_some(mods)
    }
}
