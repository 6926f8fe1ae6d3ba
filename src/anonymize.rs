//
// anonymize.rs
// IML-Prep
//
// Header-level DICOM anonymization for a single file or a whole tree. Patient IDs are replaced by
// a stable hash so studies of the same patient still group together.
//

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dicom::core::value::PrimitiveValue;
use dicom::core::{DataElement, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::InMemDicomObject;
use sha2::{Digest, Sha256};

use crate::batch;
use crate::dicom_access::{
    open_lenient, ElementAccess, INSTITUTION_NAME, PATIENT_BIRTH_DATE, PATIENT_ID, PATIENT_NAME,
    REFERRING_PHYSICIAN_NAME,
};
use crate::error::PrepError;
use crate::models::BatchCounts;

pub const ANON_PATIENT_NAME: &str = "ANONYMOUS^PATIENT";
pub const ANON_TEXT: &str = "ANONYMIZED";

/// `ANON_` plus the first 16 hex digits of SHA-256 over the original ID, upper-case.
pub fn pseudonym(original_id: &str) -> String {
    let digest = Sha256::digest(original_id.as_bytes());
    format!("ANON_{}", hex::encode(digest)[..16].to_uppercase())
}

pub fn anonymize_object(obj: &mut InMemDicomObject<StandardDataDictionary>) {
    let original_id = obj
        .element_str(PATIENT_ID)
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let anon_id = pseudonym(&original_id);

    let replacements = [
        (PATIENT_NAME, VR::PN, ANON_PATIENT_NAME),
        (PATIENT_ID, VR::LO, anon_id.as_str()),
        (INSTITUTION_NAME, VR::LO, ANON_TEXT),
        (REFERRING_PHYSICIAN_NAME, VR::PN, ANON_TEXT),
    ];
    for (tag, vr, value) in replacements {
        obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }
    obj.remove_element(PATIENT_BIRTH_DATE);
}

pub fn anonymize_file(input: &Path, output: &Path) -> Result<()> {
    let mut obj = open_lenient(input)?;
    anonymize_object(&mut obj);
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    obj.write_to_file(output)
        .with_context(|| format!("Failed to write {:?}", output))?;
    Ok(())
}

/// Sibling path `<stem>_anon.dcm` used when no output is given for a single file.
pub fn default_file_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dicom".to_string());
    input.with_file_name(format!("{}_anon.dcm", stem))
}

/// Anonymizes `input` (file or directory). Directory mode mirrors the tree under `output`,
/// defaulting to `<input>_anon`; files that are not DICOM are counted as skipped.
pub fn run(input: &Path, output: Option<&Path>) -> Result<BatchCounts> {
    if input.is_file() {
        let target = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_file_output(input));
        anonymize_file(input, &target)?;
        tracing::info!(output = %target.display(), "anonymized file written");
        return Ok(BatchCounts {
            processed: 1,
            skipped: 0,
        });
    }
    if !input.is_dir() {
        return Err(PrepError::MissingInput(input.to_path_buf()).into());
    }

    let out_root = output.map(Path::to_path_buf).unwrap_or_else(|| {
        let name = format!("{}_anon", batch::file_name_str(input));
        input.with_file_name(name)
    });

    let mut counts = BatchCounts::default();
    for file in batch::collect_files(input) {
        let rel = file.strip_prefix(input).unwrap_or(&file);
        let target = out_root.join(rel);
        match anonymize_file(&file, &target) {
            Ok(()) => counts.processed += 1,
            Err(e) => {
                tracing::debug!(file = %file.display(), error = %e, "not anonymized");
                counts.skipped += 1;
            }
        }
    }
    tracing::info!(
        output = %out_root.display(),
        processed = counts.processed,
        skipped = counts.skipped,
        "tree anonymized"
    );
    Ok(counts)
}
