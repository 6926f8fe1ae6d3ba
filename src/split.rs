//
// split.rs
// IML-Prep
//
// Train/val/test splitting, either per image within each class folder or per patient with a
// holdout set and a CSV manifest.
//

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::batch::{self, TransferMode};
use crate::error::PrepError;
use crate::models::{ClassSplitCounts, ManifestRow, PatientSplitSummary};

pub const FILE_SPLITS: [&str; 3] = ["train", "val", "test"];
pub const PATIENT_SPLITS: [&str; 4] = ["train", "val", "test", "holdout"];

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileSplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for FileSplitRatios {
    fn default() -> Self {
        Self {
            train: 0.75,
            val: 0.10,
            test: 0.15,
        }
    }
}

impl FileSplitRatios {
    /// Every ratio must be non-negative and the three must sum to 1.
    pub fn validate(&self) -> std::result::Result<(), PrepError> {
        let sum = self.train + self.val + self.test;
        if self.train < 0.0 || self.val < 0.0 || self.test < 0.0 || (sum - 1.0).abs() > 1e-6 {
            return Err(PrepError::InvalidRatios(format!(
                "train={} val={} test={} must be >= 0 and sum to 1",
                self.train, self.val, self.test
            )));
        }
        Ok(())
    }
}

/// (train, val, test) sizes for `n` files; test takes the remainder.
pub fn file_split_sizes(n: usize, ratios: FileSplitRatios) -> (usize, usize, usize) {
    let n_train = ((ratios.train * n as f64).floor() as usize).min(n);
    let n_val = ((ratios.val * n as f64).floor() as usize).min(n - n_train);
    (n_train, n_val, n - n_train - n_val)
}

/// Copies each class folder's images into `output/{train,val,test}/<class>`.
pub fn split_files(
    input: &Path,
    output: &Path,
    classes: &[String],
    ratios: FileSplitRatios,
    seed: Option<u64>,
) -> Result<BTreeMap<String, ClassSplitCounts>> {
    if !input.is_dir() {
        return Err(PrepError::MissingInput(input.to_path_buf()).into());
    }
    ratios.validate()?;

    let class_names: Vec<String> = if classes.is_empty() {
        batch::subdirectories(input)?
            .iter()
            .map(|d| batch::file_name_str(d))
            .collect()
    } else {
        classes.to_vec()
    };

    for split in FILE_SPLITS {
        for class in &class_names {
            let dir = output.join(split).join(class);
            fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
    }

    let mut rng = rng_for(seed);
    let mut report = BTreeMap::new();
    for class in &class_names {
        let class_dir = input.join(class);
        if !class_dir.is_dir() {
            tracing::warn!(dir = %class_dir.display(), "class directory not found, skipping");
            continue;
        }

        let mut files = batch::list_images(&class_dir)?;
        files.shuffle(&mut rng);
        let (n_train, n_val, _) = file_split_sizes(files.len(), ratios);

        let mut counts = ClassSplitCounts::default();
        for (idx, file) in files.iter().enumerate() {
            let (split, slot) = if idx < n_train {
                ("train", &mut counts.train)
            } else if idx < n_train + n_val {
                ("val", &mut counts.val)
            } else {
                ("test", &mut counts.test)
            };
            let dest = output.join(split).join(class).join(batch::file_name_str(file));
            match fs::copy(file, &dest) {
                Ok(_) => *slot += 1,
                Err(e) => {
                    tracing::warn!(
                        file = %file.display(),
                        dest = %dest.display(),
                        error = %e,
                        "copy failed, skipping"
                    );
                    counts.skipped += 1;
                }
            }
        }

        tracing::info!(
            class = %class,
            n_train = counts.train,
            n_val = counts.val,
            n_test = counts.test,
            skipped = counts.skipped,
            "class split"
        );
        report.insert(class.clone(), counts);
    }

    Ok(report)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientSplitOptions {
    pub val: f64,
    pub test: f64,
    pub holdout: f64,
    pub seed: u64,
    pub copy: bool,
    pub flatten: bool,
}

impl Default for PatientSplitOptions {
    fn default() -> Self {
        Self {
            val: 0.15,
            test: 0.15,
            holdout: 0.05,
            seed: 42,
            copy: false,
            flatten: false,
        }
    }
}

impl PatientSplitOptions {
    pub fn validate(&self) -> Result<()> {
        if self.val < 0.0 || self.test < 0.0 || self.holdout < 0.0 {
            bail!(PrepError::InvalidRatios(
                "val/test/holdout must be >= 0".to_string()
            ));
        }
        if self.val + self.test + self.holdout >= 1.0 {
            bail!(PrepError::InvalidRatios(
                "val+test+holdout must be < 1.0 so patients remain for train".to_string()
            ));
        }
        Ok(())
    }
}

/// Images per (class, patient) found under `root/<class>/<patient>/**`.
pub type PatientImages = BTreeMap<(String, String), Vec<PathBuf>>;

pub fn collect_patients(root: &Path) -> Result<(PatientImages, Vec<String>)> {
    if !root.is_dir() {
        return Err(PrepError::MissingInput(root.to_path_buf()).into());
    }

    let class_dirs = batch::subdirectories(root)?;
    let class_names: Vec<String> = class_dirs.iter().map(|d| batch::file_name_str(d)).collect();

    let mut patients = PatientImages::new();
    let mut empty = Vec::new();
    for (class, class_dir) in class_names.iter().zip(&class_dirs) {
        for patient_dir in batch::subdirectories(class_dir)? {
            let patient = batch::file_name_str(&patient_dir);
            let images = batch::collect_images(&patient_dir);
            if images.is_empty() {
                empty.push(format!("{}/{}", class, patient));
            } else {
                patients.insert((class.clone(), patient), images);
            }
        }
    }

    if !empty.is_empty() {
        tracing::warn!(count = empty.len(), "patients without images ignored");
        for key in empty.iter().take(10) {
            tracing::warn!(patient = %key, "no images");
        }
    }
    if patients.is_empty() {
        return Err(PrepError::NoImages(root.to_path_buf()).into());
    }
    Ok((patients, class_names))
}

fn round_half_even(x: f64) -> usize {
    x.round_ties_even().max(0.0) as usize
}

/// Split name per (class, patient), stratified by class.
pub fn assign_patients(
    patients: &PatientImages,
    class_names: &[String],
    options: &PatientSplitOptions,
) -> BTreeMap<(String, String), &'static str> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut assignment = BTreeMap::new();

    for class in class_names {
        let mut ids: Vec<&String> = patients
            .keys()
            .filter(|(c, _)| c == class)
            .map(|(_, p)| p)
            .collect();
        ids.sort();
        ids.shuffle(&mut rng);

        let n = ids.len();
        let n_hold = round_half_even(n as f64 * options.holdout).min(n);
        let n_test = round_half_even(n as f64 * options.test).min(n - n_hold);
        let n_val = round_half_even(n as f64 * options.val).min(n - n_hold - n_test);

        for (idx, pid) in ids.into_iter().enumerate() {
            let split = if idx < n_hold {
                "holdout"
            } else if idx < n_hold + n_val {
                "val"
            } else if idx < n_hold + n_val + n_test {
                "test"
            } else {
                "train"
            };
            assignment.insert((class.clone(), pid.clone()), split);
        }
    }
    assignment
}

pub fn linked_name(patient: &str, image: &Path, index: usize, flatten: bool) -> String {
    let ext = image
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    if flatten {
        format!("{}__{:04}{}", patient, index, ext)
    } else {
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}__{}{}", patient, stem, ext)
    }
}

/// Patient-level stratified split with holdout; writes `manifest.csv` in the output root.
pub fn split_patients(
    root: &Path,
    output: &Path,
    options: &PatientSplitOptions,
) -> Result<PatientSplitSummary> {
    options.validate()?;
    let (patients, class_names) = collect_patients(root)?;
    let assignment = assign_patients(&patients, &class_names, options);

    for split in PATIENT_SPLITS {
        for class in &class_names {
            let dir = output.join(split).join(class);
            fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
    }

    let mode = if options.copy {
        TransferMode::Copy
    } else {
        TransferMode::Symlink
    };

    let mut summary = PatientSplitSummary::default();
    for split in PATIENT_SPLITS {
        let per_class = summary.per_split.entry(split.to_string()).or_default();
        for class in &class_names {
            per_class.insert(class.clone(), 0);
        }
    }

    for ((class, patient), images) in &patients {
        let split = assignment
            .get(&(class.clone(), patient.clone()))
            .copied()
            .unwrap_or("train");
        let base = output.join(split).join(class);

        let mut linked = 0;
        for (idx, image) in images.iter().enumerate() {
            let dest = base.join(linked_name(patient, image, idx, options.flatten));
            match batch::place_file(image, &dest, mode) {
                Ok(()) => linked += 1,
                Err(e) => {
                    tracing::warn!(
                        file = %image.display(),
                        dest = %dest.display(),
                        error = %e,
                        "link failed, skipping"
                    );
                    summary.skipped += 1;
                }
            }
        }

        summary.total_images += linked;
        *summary
            .per_split
            .entry(split.to_string())
            .or_default()
            .entry(class.clone())
            .or_default() += linked;
        summary.manifest.push(ManifestRow {
            class: class.clone(),
            patient: patient.clone(),
            split: split.to_string(),
            num_images: linked,
        });
    }

    summary.manifest.sort_by(|a, b| {
        (&a.split, &a.class, &a.patient).cmp(&(&b.split, &b.class, &b.patient))
    });
    write_manifest(&output.join("manifest.csv"), &summary.manifest)?;

    Ok(summary)
}

pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(100, (75, 10, 15))]
    #[case(10, (7, 1, 2))]
    #[case(1, (0, 0, 1))]
    #[case(0, (0, 0, 0))]
    fn file_split_sizes_floor_train_and_val(#[case] n: usize, #[case] expected: (usize, usize, usize)) {
        assert_eq!(file_split_sizes(n, FileSplitRatios::default()), expected);
    }

    #[test]
    fn file_ratios_must_sum_to_one() {
        let over = FileSplitRatios {
            train: 0.8,
            val: 0.1,
            test: 0.2,
        };
        assert!(over.validate().is_err());
        let negative = FileSplitRatios {
            train: 1.0,
            val: -0.1,
            test: 0.1,
        };
        assert!(negative.validate().is_err());
        assert!(FileSplitRatios::default().validate().is_ok());
    }

    #[test]
    fn ratios_must_leave_room_for_train() {
        let opts = PatientSplitOptions {
            val: 0.5,
            test: 0.5,
            ..PatientSplitOptions::default()
        };
        assert!(opts.validate().is_err());
        let opts = PatientSplitOptions {
            holdout: -0.1,
            ..PatientSplitOptions::default()
        };
        assert!(opts.validate().is_err());
        assert!(PatientSplitOptions::default().validate().is_ok());
    }

    #[test]
    fn rounding_is_half_even() {
        assert_eq!(round_half_even(0.5), 0);
        assert_eq!(round_half_even(1.5), 2);
        assert_eq!(round_half_even(2.5), 2);
        assert_eq!(round_half_even(3.0), 3);
    }

    #[test]
    fn assignment_is_stratified_and_deterministic() {
        let mut patients = PatientImages::new();
        for class in ["feminino", "masculino"] {
            for i in 0..20 {
                patients.insert(
                    (class.to_string(), format!("P{:03}", i)),
                    vec![PathBuf::from("x.png")],
                );
            }
        }
        let classes = vec!["feminino".to_string(), "masculino".to_string()];
        let opts = PatientSplitOptions::default();

        let first = assign_patients(&patients, &classes, &opts);
        let second = assign_patients(&patients, &classes, &opts);
        assert_eq!(first, second);

        for class in &classes {
            let count = |split: &str| {
                first
                    .iter()
                    .filter(|((c, _), s)| c == class && **s == split)
                    .count()
            };
            // 20 * 0.05 = 1, 20 * 0.15 = 3
            assert_eq!(count("holdout"), 1);
            assert_eq!(count("test"), 3);
            assert_eq!(count("val"), 3);
            assert_eq!(count("train"), 13);
        }
    }

    #[test]
    fn linked_names_carry_patient_prefix() {
        let img = Path::new("/d/P1/cranio/IMG_01.JPG");
        assert_eq!(linked_name("P1", img, 3, false), "P1__IMG_01.jpg");
        assert_eq!(linked_name("P1", img, 3, true), "P1__0003.jpg");
    }
}
