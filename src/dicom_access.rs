//
// dicom_access.rs
// IML-Prep
//
// Tag constants, lenient file opening and a small trait for pulling typed values out of DICOM objects.
//

use std::path::Path;

use anyhow::{Context, Result};
use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::file::ReadPreamble;
use dicom::object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions};

// Patient
pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
pub const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);

// Study / series
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
pub const STUDY_DESCRIPTION: Tag = Tag(0x0008, 0x1030);
pub const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
pub const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
pub const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
pub const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);
pub const PROTOCOL_NAME: Tag = Tag(0x0018, 0x1030);
pub const BODY_PART_EXAMINED: Tag = Tag(0x0018, 0x0015);
pub const INSTITUTION_NAME: Tag = Tag(0x0008, 0x0080);
pub const REFERRING_PHYSICIAN_NAME: Tag = Tag(0x0008, 0x0090);

// Image
pub const IMAGE_TYPE: Tag = Tag(0x0008, 0x0008);
pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
pub const MODALITY: Tag = Tag(0x0008, 0x0060);
pub const NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);
pub const IMAGE_ORIENTATION_PATIENT: Tag = Tag(0x0020, 0x0037);
pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag(0x0028, 0x0004);
pub const WINDOW_CENTER: Tag = Tag(0x0028, 0x1050);
pub const WINDOW_WIDTH: Tag = Tag(0x0028, 0x1051);
pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

/// Small helper trait to pull values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn element_multi_str(&self, tag: Tag) -> Vec<String>;
    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>>;
    fn element_int(&self, tag: Tag) -> Option<i64>;
    fn has_element(&self, tag: Tag) -> bool;
}

fn split_multi(raw: &str) -> Vec<String> {
    raw.split('\\')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim().trim_end_matches('\0').to_string())
    }

    fn element_multi_str(&self, tag: Tag) -> Vec<String> {
        self.element_str(tag)
            .map(|raw| split_multi(&raw))
            .unwrap_or_default()
    }

    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
    }

    fn element_int(&self, tag: Tag) -> Option<i64> {
        // IS values may carry padding, so go through the trimmed text.
        self.element_str(tag).and_then(|s| s.parse().ok())
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }

    fn element_multi_str(&self, tag: Tag) -> Vec<String> {
        (**self).element_multi_str(tag)
    }

    fn element_f64s(&self, tag: Tag) -> Option<Vec<f64>> {
        (**self).element_f64s(tag)
    }

    fn element_int(&self, tag: Tag) -> Option<i64> {
        (**self).element_int(tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        (**self).has_element(tag)
    }
}

/// Opens a DICOM file whether or not it carries the 128-byte preamble.
pub fn open_lenient(path: &Path) -> Result<DefaultDicomObject> {
    OpenFileOptions::new()
        .read_preamble(ReadPreamble::Auto)
        .open_file(path)
        .with_context(|| format!("Failed to open DICOM file {:?}", path))
}

/// Reads only the header, stopping before Pixel Data.
pub fn open_header(path: &Path) -> Result<DefaultDicomObject> {
    OpenFileOptions::new()
        .read_preamble(ReadPreamble::Auto)
        .read_until(PIXEL_DATA)
        .open_file(path)
        .with_context(|| format!("Failed to read DICOM header {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multi_drops_empty_parts() {
        assert_eq!(
            split_multi("ORIGINAL\\PRIMARY\\\\AXIAL "),
            vec!["ORIGINAL", "PRIMARY", "AXIAL"]
        );
        assert!(split_multi("").is_empty());
    }
}
