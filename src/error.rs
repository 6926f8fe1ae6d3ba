//
// error.rs
// IML-Prep
//
// Typed failures raised by the library layer; command entry points wrap them in anyhow.
//

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Why a candidate file produced no output in the DICOM pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable,
    NonImage,
    ModalityFiltered,
    Localizer,
    Derived,
    PixelDecode,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::Unreadable => "unreadable",
            SkipReason::NonImage => "non-image",
            SkipReason::ModalityFiltered => "modality filtered",
            SkipReason::Localizer => "localizer",
            SkipReason::Derived => "derived",
            SkipReason::PixelDecode => "pixel decode failure",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("input directory not found: {0}")]
    MissingInput(PathBuf),

    #[error("no subfolders found in {0}")]
    NoSubfolders(PathBuf),

    #[error("no images found under {0}")]
    NoImages(PathBuf),

    #[error("invalid split ratios: {0}")]
    InvalidRatios(String),

    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, PrepError>;
