//
// lib.rs
// IML-Prep
//
// Exposes one module per CLI verb plus the shared DICOM, pixel and file helpers they build on.
//

pub mod animation;
pub mod anonymize;
pub mod augment;
pub mod batch;
pub mod clahe;
pub mod cli;
pub mod config;
pub mod convert;
pub mod dicom_access;
pub mod dump;
pub mod error;
pub mod inspect;
pub mod models;
pub mod naming;
pub mod organize;
pub mod pivot;
pub mod pixels;
pub mod quality;
pub mod redact;
pub mod resize;
pub mod series;
pub mod split;
pub mod transform;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{PrepError, SkipReason};
