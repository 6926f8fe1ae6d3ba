//
// series.rs
// IML-Prep
//
// Groups DICOM files by series and sorts each series into `transversal/` or `3d/` using
// multi-frame structure, reconstruction keywords and the image plane orientation.
//

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use dicom::object::DefaultDicomObject;
use regex::Regex;
use serde::Serialize;

use crate::batch::{self, TransferMode};
use crate::dicom_access::{
    open_header, ElementAccess, IMAGE_ORIENTATION_PATIENT, IMAGE_TYPE, NUMBER_OF_FRAMES,
    PROTOCOL_NAME, SERIES_DESCRIPTION, SERIES_INSTANCE_UID,
};
use crate::error::PrepError;
use crate::models::SeriesSummary;

/// Minimum |z| of the slice normal for a plane to count as axial.
pub const AXIAL_THRESHOLD: f64 = 0.85;

/// Whole-word markers of volume renderings and reformats.
pub const STRONG_3D_TOKENS: &[&str] = &[
    "VRT",
    "VR",
    "MIP",
    "SSD",
    "SURFACE",
    "RADIAL",
    "CSAMANIPULATED",
    "VOLUME",
    "3D",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SeriesClass {
    #[serde(rename = "transversal")]
    Transversal,
    #[serde(rename = "3d")]
    Volume3d,
}

impl SeriesClass {
    pub fn dir_name(self) -> &'static str {
        match self {
            SeriesClass::Transversal => "transversal",
            SeriesClass::Volume3d => "3d",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub mode: TransferMode,
    pub dry_run: bool,
    pub progress_step: usize,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            mode: TransferMode::Copy,
            dry_run: false,
            progress_step: 1000,
        }
    }
}

/// Files of one series plus the header of the first file read.
pub struct SeriesGroup {
    pub files: Vec<PathBuf>,
    pub representative: DefaultDicomObject,
}

fn word_tokens() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z0-9_]+").expect("static regex"))
}

/// `Some(true)` when the slice normal lies within the axial threshold of the Z axis.
pub fn plane_axial(iop: &[f64]) -> Option<bool> {
    if iop.len() < 6 {
        return None;
    }
    let r = [iop[0], iop[1], iop[2]];
    let c = [iop[3], iop[4], iop[5]];
    let n = [
        r[1] * c[2] - r[2] * c[1],
        r[2] * c[0] - r[0] * c[2],
        r[0] * c[1] - r[1] * c[0],
    ];
    let norm = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if !norm.is_finite() || norm < 1e-6 {
        return None;
    }
    Some((n[2] / norm).abs() >= AXIAL_THRESHOLD)
}

pub fn is_true_3d<T: ElementAccess>(obj: &T) -> bool {
    if obj.element_int(NUMBER_OF_FRAMES).unwrap_or(0) > 1 {
        return true;
    }

    let text = [SERIES_DESCRIPTION, PROTOCOL_NAME, IMAGE_TYPE]
        .into_iter()
        .map(|tag| obj.element_multi_str(tag).join(" ").to_uppercase())
        .collect::<Vec<_>>()
        .join(" ");

    word_tokens()
        .find_iter(&text)
        .any(|m| STRONG_3D_TOKENS.contains(&m.as_str()))
}

pub fn classify_series<T: ElementAccess>(rep: &T) -> SeriesClass {
    if is_true_3d(rep) {
        return SeriesClass::Volume3d;
    }

    let axial = rep
        .element_f64s(IMAGE_ORIENTATION_PATIENT)
        .and_then(|iop| plane_axial(&iop));
    let axial_token = rep
        .element_multi_str(IMAGE_TYPE)
        .iter()
        .any(|t| t.eq_ignore_ascii_case("AXIAL"));
    if axial != Some(true) && !axial_token {
        tracing::debug!(?axial, "no axial evidence, defaulting to transversal");
    }
    SeriesClass::Transversal
}

/// Reads every header below `root` and groups files by SeriesInstanceUID.
pub fn group_series(root: &Path) -> BTreeMap<String, SeriesGroup> {
    let mut groups: BTreeMap<String, SeriesGroup> = BTreeMap::new();
    for path in batch::collect_files(root) {
        let header = match open_header(&path) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "ignoring non-DICOM file");
                continue;
            }
        };
        let key = header
            .element_str(SERIES_INSTANCE_UID)
            .filter(|uid| !uid.is_empty())
            .unwrap_or_else(|| format!("NO_SERIES__{}", path.display()));
        match groups.get_mut(&key) {
            Some(group) => group.files.push(path),
            None => {
                groups.insert(
                    key,
                    SeriesGroup {
                        files: vec![path],
                        representative: header,
                    },
                );
            }
        }
    }
    groups
}

pub fn run(input: &Path, output: &Path, options: &ClassifyOptions) -> Result<SeriesSummary> {
    if !input.is_dir() {
        return Err(PrepError::MissingInput(input.to_path_buf()).into());
    }
    let in_root = input
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", input))?;
    for class in [SeriesClass::Transversal, SeriesClass::Volume3d] {
        let dir = output.join(class.dir_name());
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }

    let groups = group_series(&in_root);
    let mut summary = SeriesSummary {
        series: groups.len(),
        ..SeriesSummary::default()
    };
    let step = options.progress_step.max(1);
    let mut processed = 0usize;

    for (uid, group) in &groups {
        let class = classify_series(&group.representative);
        tracing::debug!(series = %uid, class = class.dir_name(), files = group.files.len(), "series classified");

        for src in &group.files {
            let dest = output
                .join(class.dir_name())
                .join(batch::relative_dir(src, &in_root))
                .join(batch::file_name_str(src));

            let placed = if options.dry_run {
                tracing::info!(from = %src.display(), to = %dest.display(), "dry run");
                Ok(())
            } else {
                batch::place_file(src, &dest, options.mode)
            };

            match placed {
                Ok(()) => {
                    match class {
                        SeriesClass::Transversal => summary.transversal += 1,
                        SeriesClass::Volume3d => summary.volume_3d += 1,
                    }
                    processed += 1;
                    if processed % step == 0 {
                        tracing::info!(processed, "progress");
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %src.display(), error = %e, "failed to place file");
                    summary.failed += 1;
                }
            }
        }
    }

    Ok(summary)
}
