//
// convert.rs
// IML-Prep
//
// DICOM to PNG batch conversion: metadata filters, pixel normalization, optional CLAHE, resize,
// quality gate and study/series-based output layout. Work is spread over a rayon pool.
//

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use dicom::object::DefaultDicomObject;
use ndarray::Axis;
use rayon::prelude::*;

use crate::config::ConvertConfig;
use crate::dicom_access::{
    open_lenient, ElementAccess, IMAGE_TYPE, MODALITY, PIXEL_DATA, SOP_CLASS_UID,
};
use crate::error::{PrepError, SkipReason};
use crate::models::{ConversionSummary, FileOutcome};
use crate::quality::QualityMetrics;
use crate::{batch, clahe, naming, pixels};

/// SOP classes that carry no displayable image (raw data, SR, RT plans, encapsulated docs).
pub const NON_IMAGE_SOP_PREFIXES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.66",
    "1.2.840.10008.5.1.4.1.1.88",
    "1.2.840.10008.5.1.4.1.1.481",
    "1.2.840.10008.5.1.4.1.1.104",
];

const LOCALIZER_TOKENS: &[&str] = &["LOCALIZER", "SCOUT"];

struct Job<'a> {
    input_root: &'a Path,
    output_root: &'a Path,
    config: &'a ConvertConfig,
    modalities: Option<BTreeSet<String>>,
}

pub fn run(input: &Path, output: &Path, config: &ConvertConfig) -> Result<ConversionSummary> {
    if !input.is_dir() {
        return Err(PrepError::MissingInput(input.to_path_buf()).into());
    }
    config.validate()?;
    let input_root = input
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", input))?;
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory {:?}", output))?;
    let output_root = output
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", output))?;

    let subfolders = batch::subdirectories(&input_root)?;
    if subfolders.is_empty() {
        return Err(PrepError::NoSubfolders(input_root).into());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .context("Failed to build worker pool")?;

    let job = Job {
        input_root: &input_root,
        output_root: &output_root,
        config,
        modalities: config.modality_filter(),
    };

    let mut summary = ConversionSummary::default();
    for subfolder in &subfolders {
        let files = batch::collect_files(subfolder);
        tracing::info!(
            folder = %subfolder.display(),
            candidates = files.len(),
            "scanning folder"
        );
        let partial = pool.install(|| {
            files
                .par_iter()
                .map(|path| convert_file(path, &job))
                .fold(ConversionSummary::default, |mut acc, outcome| {
                    acc.record(outcome);
                    acc
                })
                .reduce(ConversionSummary::default, ConversionSummary::merge)
        });
        summary = summary.merge(partial);
    }

    Ok(summary)
}

/// Metadata filters applied before any pixel work.
pub fn screen_instance<T: ElementAccess>(
    obj: &T,
    config: &ConvertConfig,
    modalities: Option<&BTreeSet<String>>,
) -> Option<SkipReason> {
    if looks_like_non_image(obj) {
        return Some(SkipReason::NonImage);
    }
    if let Some(allowed) = modalities {
        let modality = obj.element_str(MODALITY).unwrap_or_default().to_uppercase();
        if !allowed.contains(&modality) {
            return Some(SkipReason::ModalityFiltered);
        }
    }
    let (localizer, derived) = localizer_or_derived(obj);
    if config.drop_localizer && localizer {
        return Some(SkipReason::Localizer);
    }
    if config.drop_derived && derived {
        return Some(SkipReason::Derived);
    }
    None
}

pub fn looks_like_non_image<T: ElementAccess>(obj: &T) -> bool {
    if !obj.has_element(PIXEL_DATA) {
        return true;
    }
    let sop = obj.element_str(SOP_CLASS_UID).unwrap_or_default();
    NON_IMAGE_SOP_PREFIXES
        .iter()
        .any(|prefix| sop.starts_with(prefix))
}

pub fn localizer_or_derived<T: ElementAccess>(obj: &T) -> (bool, bool) {
    let tokens: Vec<String> = obj
        .element_multi_str(IMAGE_TYPE)
        .into_iter()
        .map(|t| t.to_uppercase())
        .collect();
    let localizer = tokens
        .iter()
        .any(|t| LOCALIZER_TOKENS.contains(&t.as_str()));
    let derived = tokens.iter().any(|t| t == "DERIVED");
    (localizer, derived)
}

/// First two directory levels (e.g. class/patient) of `file` below the input root.
pub fn kept_prefix(file: &Path, input_root: &Path) -> PathBuf {
    batch::relative_dir(file, input_root)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .take(2)
        .collect()
}

pub fn frame_file_name(stem: &str, index: usize) -> String {
    if index > 0 {
        format!("{}_f{:04}.png", stem, index)
    } else {
        format!("{}.png", stem)
    }
}

fn convert_file(path: &Path, job: &Job<'_>) -> FileOutcome {
    let obj = match open_lenient(path) {
        Ok(obj) => obj,
        Err(e) => {
            tracing::debug!(file = %path.display(), error = %e, "not a readable DICOM file");
            return FileOutcome::Skipped(SkipReason::Unreadable);
        }
    };

    if let Some(reason) = screen_instance(&obj, job.config, job.modalities.as_ref()) {
        tracing::debug!(file = %path.display(), %reason, "skipping instance");
        return FileOutcome::Skipped(reason);
    }

    match export_frames(path, &obj, job) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "failed to decode pixel data");
            FileOutcome::Skipped(SkipReason::PixelDecode)
        }
    }
}

fn export_frames(path: &Path, obj: &DefaultDicomObject, job: &Job<'_>) -> Result<FileOutcome> {
    let config = job.config;
    let frames = pixels::load_frames(obj)?;
    let out_dir = job
        .output_root
        .join(kept_prefix(path, job.input_root))
        .join(naming::subdir_for(obj, config.split_by));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let mut saved = 0;
    let mut rejected = 0;
    let chosen = config.frames.indices(frames.len_of(Axis(0)));
    for (i, frame_index) in chosen.into_iter().enumerate() {
        let frame = pixels::frame(&frames, frame_index);
        let mut img = pixels::to_uint8(&frame)?;
        img = pixels::ensure_rgb(img, config.rgb);
        if config.clahe {
            img = clahe::apply(&img);
        }
        img = pixels::resize_if_needed(img, config.max_size);

        let metrics = QualityMetrics::measure(&img);
        if !metrics.passes(&config.quality) {
            tracing::debug!(file = %path.display(), frame = frame_index, ?metrics, "frame rejected");
            rejected += 1;
            continue;
        }

        let target = out_dir.join(frame_file_name(&stem, i));
        let written = fs::create_dir_all(&out_dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| img.save(&target).map_err(anyhow::Error::from));
        match written {
            Ok(()) => saved += 1,
            Err(e) => {
                tracing::warn!(file = %target.display(), error = %e, "failed to write png");
                rejected += 1;
            }
        }
    }

    Ok(FileOutcome::Converted { saved, rejected })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::dictionary_std::StandardDataDictionary;
    use dicom::object::InMemDicomObject;

    fn instance(image_type: &str, sop: &str, modality: &str) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        obj.put(DataElement::new(IMAGE_TYPE, VR::CS, PrimitiveValue::from(image_type)));
        obj.put(DataElement::new(SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop)));
        obj.put(DataElement::new(MODALITY, VR::CS, PrimitiveValue::from(modality)));
        obj.put(DataElement::new(PIXEL_DATA, VR::OB, PrimitiveValue::from(vec![0u8; 4])));
        obj
    }

    const CT_IMAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

    #[test]
    fn localizers_are_dropped_by_default() {
        let cfg = ConvertConfig::default();
        let obj = instance("ORIGINAL\\PRIMARY\\LOCALIZER", CT_IMAGE, "CT");
        assert_eq!(screen_instance(&obj, &cfg, None), Some(SkipReason::Localizer));

        let keep = ConvertConfig {
            drop_localizer: false,
            ..ConvertConfig::default()
        };
        assert_eq!(screen_instance(&obj, &keep, None), None);
    }

    #[test]
    fn derived_images_only_dropped_on_request() {
        let obj = instance("DERIVED\\SECONDARY\\AXIAL", CT_IMAGE, "CT");
        assert_eq!(screen_instance(&obj, &ConvertConfig::default(), None), None);
        let cfg = ConvertConfig {
            drop_derived: true,
            ..ConvertConfig::default()
        };
        assert_eq!(screen_instance(&obj, &cfg, None), Some(SkipReason::Derived));
    }

    #[test]
    fn structured_reports_are_not_images() {
        let obj = instance("ORIGINAL", "1.2.840.10008.5.1.4.1.1.88.22", "SR");
        assert_eq!(
            screen_instance(&obj, &ConvertConfig::default(), None),
            Some(SkipReason::NonImage)
        );

        let mut no_pixels = instance("ORIGINAL", CT_IMAGE, "CT");
        no_pixels.remove_element(PIXEL_DATA);
        assert!(looks_like_non_image(&no_pixels));
    }

    #[test]
    fn modality_whitelist_filters() {
        let cfg = ConvertConfig {
            only_mods: "MR".to_string(),
            ..ConvertConfig::default()
        };
        let mods = cfg.modality_filter();
        let obj = instance("ORIGINAL", CT_IMAGE, "CT");
        assert_eq!(
            screen_instance(&obj, &cfg, mods.as_ref()),
            Some(SkipReason::ModalityFiltered)
        );
    }

    #[test]
    fn kept_prefix_takes_two_levels() {
        let root = Path::new("/in");
        assert_eq!(
            kept_prefix(Path::new("/in/Feminino/26F/S1/IM1"), root),
            PathBuf::from("Feminino/26F")
        );
        assert_eq!(kept_prefix(Path::new("/in/Feminino/IM1"), root), PathBuf::from("Feminino"));
        assert_eq!(kept_prefix(Path::new("/in/IM1"), root), PathBuf::new());
    }

    #[test]
    fn frame_names_only_suffix_later_frames() {
        assert_eq!(frame_file_name("IM0001", 0), "IM0001.png");
        assert_eq!(frame_file_name("IM0001", 12), "IM0001_f0012.png");
    }
}
