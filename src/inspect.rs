//
// inspect.rs
// IML-Prep
//
// Spot-checks the patient and study fields of the first readable DICOM files under a root, e.g.
// to confirm a tree was anonymized before export.
//

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use dicom::core::Tag;
use serde::Serialize;

use crate::batch;
use crate::dicom_access::{
    open_lenient, ElementAccess, BODY_PART_EXAMINED, PATIENT_ID, PATIENT_NAME, PATIENT_SEX,
    STUDY_DATE, STUDY_DESCRIPTION,
};
use crate::dump;
use crate::error::PrepError;

const ESSENTIAL_FIELDS: &[(&str, Tag)] = &[
    ("PatientID", PATIENT_ID),
    ("PatientName", PATIENT_NAME),
    ("PatientSex", PATIENT_SEX),
    ("StudyDate", STUDY_DATE),
    ("StudyDescription", STUDY_DESCRIPTION),
    ("BodyPartExamined", BODY_PART_EXAMINED),
];

#[derive(Debug, Clone, Serialize)]
pub struct InspectedFile {
    pub path: PathBuf,
    pub fields: Vec<(String, String)>,
    /// Full element dump, only for the first file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump: Option<String>,
}

pub fn essential_fields<T: ElementAccess>(obj: &T) -> Vec<(String, String)> {
    ESSENTIAL_FIELDS
        .iter()
        .map(|(label, tag)| {
            let value = obj
                .element_str(*tag)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "N/A".to_string());
            (label.to_string(), value)
        })
        .collect()
}

/// Reads up to `limit` DICOM files below `root`, silently passing over anything else.
pub fn inspect(root: &Path, limit: usize) -> Result<Vec<InspectedFile>> {
    if !root.exists() {
        return Err(PrepError::MissingInput(root.to_path_buf()).into());
    }

    let mut found = Vec::new();
    for path in batch::collect_files(root) {
        if found.len() >= limit {
            break;
        }
        let Ok(obj) = open_lenient(&path) else {
            continue;
        };
        let dump = found
            .is_empty()
            .then(|| dump::dump_to_string(&obj, dump::DEFAULT_MAX_DEPTH, dump::DEFAULT_MAX_VALUE_LEN));
        found.push(InspectedFile {
            fields: essential_fields(&obj),
            path,
            dump,
        });
    }
    Ok(found)
}

pub fn render(files: &[InspectedFile]) -> String {
    let mut out = String::new();
    if files.is_empty() {
        out.push_str("No readable DICOM files found.\n");
        return out;
    }
    for file in files {
        let _ = writeln!(out, "{}", "-".repeat(50));
        let _ = writeln!(out, "File: {}", file.path.display());
        for (label, value) in &file.fields {
            let _ = writeln!(out, "  {}: {}", label, value);
        }
        if let Some(dump) = &file.dump {
            let _ = writeln!(out, "\n--- ALL ELEMENTS (first file only) ---");
            out.push_str(dump);
        }
    }
    let _ = writeln!(out, "{}", "-".repeat(50));
    out
}
