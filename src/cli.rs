//
// cli.rs
// IML-Prep
//
// Defines the CLI surface with Clap and dispatches each subcommand to its module, printing a
// summary once the batch finishes.
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use serde::Serialize;

use crate::batch::TransferMode;
use crate::config::ConvertConfig;
use crate::error::PrepError;
use crate::models::{self, BatchCounts};
use crate::naming::SplitBy;
use crate::pixels::FrameSelection;
use crate::pivot::WindowMode;
use crate::resize::ResizeMode;
use crate::{
    animation, anonymize, augment, batch, convert, inspect, organize, pivot, redact, resize,
    series, split,
};

#[derive(Parser)]
#[command(name = "iml-prep")]
#[command(about = "Dataset preparation tools for medical imaging classifiers", long_about = None)]
pub struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert DICOM studies to PNG with filtering, CLAHE and a quality gate
    Dicom2png {
        input: PathBuf,
        output: PathBuf,
        /// YAML file with conversion settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        split_by: Option<SplitBy>,
        #[arg(long, value_enum)]
        frames: Option<FrameSelection>,
        /// Longest output side (0 keeps native size)
        #[arg(long)]
        max_size: Option<u32>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        min_entropy: Option<f64>,
        #[arg(long)]
        min_nonblack_pct: Option<f64>,
        #[arg(long)]
        min_p2p: Option<u8>,
        #[arg(long)]
        min_var: Option<f64>,
        /// Comma separated modality whitelist, e.g. "CT,MR"
        #[arg(long)]
        only_mods: Option<String>,
        #[arg(long)]
        keep_localizer: bool,
        #[arg(long)]
        drop_derived: bool,
        #[arg(long)]
        no_clahe: bool,
        /// Keep monochrome images single-channel
        #[arg(long)]
        gray: bool,
        /// Remove the output directory before converting
        #[arg(long)]
        clean: bool,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Sort DICOM files into transversal/ and 3d/ by series
    ClassifySeries {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long = "move", group = "transfer")]
        move_files: bool,
        #[arg(long, group = "transfer")]
        hardlink: bool,
        #[arg(long, group = "transfer")]
        symlink: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value_t = 1000)]
        progress_step: usize,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Black out the annotation corner of every image
    Redact {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = redact::DEFAULT_SQUARE)]
        square: u32,
        /// Only take images whose parent folder name matches
        #[arg(long)]
        folder_pattern: Option<String>,
        #[arg(long)]
        clean: bool,
    },
    /// Pad/letterbox/zoom-crop images to a fixed square size
    Resize {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = ResizeMode::PadSquare)]
        mode: ResizeMode,
        /// Target side (640 for pad-square, 512 otherwise)
        #[arg(long)]
        size: Option<u32>,
        #[arg(long, default_value_t = resize::DEFAULT_ZOOM)]
        zoom: f64,
    },
    /// Regroup images into <group>_<region> class folders by file name suffix
    Organize {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long = "move")]
        move_files: bool,
        /// Region that also gets a mirrored copy (e.g. cranio)
        #[arg(long)]
        mirror: Option<String>,
    },
    /// File-level train/val/test split of class folders
    Split {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Class folder names (default: every subfolder)
        #[arg(long, value_delimiter = ',')]
        classes: Vec<String>,
        #[arg(long, default_value_t = 0.75)]
        train: f64,
        #[arg(long, default_value_t = 0.10)]
        val: f64,
        #[arg(long, default_value_t = 0.15)]
        test: f64,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        clean: bool,
    },
    /// Patient-level stratified split with holdout and manifest.csv
    SplitPatients {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 0.15)]
        val: f64,
        #[arg(long, default_value_t = 0.15)]
        test: f64,
        #[arg(long, default_value_t = 0.05)]
        holdout: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Copy files instead of creating symlinks
        #[arg(long)]
        copy: bool,
        /// Name files <patient>__<index> instead of <patient>__<stem>
        #[arg(long)]
        flatten: bool,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Augment the images of a training split
    Augment {
        train_root: PathBuf,
        /// Write augmented copies here instead of overwriting
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Copy the slices around each pivot listed in a text file
    Pivots {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        list: PathBuf,
        /// Defaults to <base>_modificado
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Neighbours taken on each side
        #[arg(short = 'x', long, default_value_t = pivot::DEFAULT_RADIUS)]
        radius: usize,
        #[arg(long, value_enum, default_value_t = WindowMode::Circular)]
        mode: WindowMode,
        /// Re-root list entries at the first /<NAME>/ (repeatable)
        #[arg(long = "anchor")]
        anchors: Vec<String>,
        /// Only consider files with these extensions
        #[arg(long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,
    },
    /// One looping GIF per image folder
    Gif {
        base: PathBuf,
        /// Folder names below BASE (default: every subfolder)
        #[arg(long = "folder")]
        folders: Vec<String>,
        #[arg(long, default_value_t = animation::DEFAULT_FRAME_MS)]
        frame_ms: u32,
        /// Background as R,G,B
        #[arg(long, value_delimiter = ',', default_values_t = [0u8, 0, 0])]
        background: Vec<u8>,
    },
    /// Anonymize DICOM headers of a file or a whole tree
    Anonymize {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print key patient/study fields of the first DICOM files under a folder
    Inspect {
        root: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Dicom2png {
            input,
            output,
            config,
            split_by,
            frames,
            max_size,
            workers,
            min_entropy,
            min_nonblack_pct,
            min_p2p,
            min_var,
            only_mods,
            keep_localizer,
            drop_derived,
            no_clahe,
            gray,
            clean,
            report,
        } => {
            let mut cfg = match config {
                Some(path) => ConvertConfig::from_yaml_file(&path)?,
                None => ConvertConfig::default(),
            };
            if let Some(v) = split_by {
                cfg.split_by = v;
            }
            if let Some(v) = frames {
                cfg.frames = v;
            }
            if let Some(v) = max_size {
                cfg.max_size = v;
            }
            if let Some(v) = workers {
                cfg.workers = v;
            }
            if let Some(v) = min_entropy {
                cfg.quality.min_entropy = v;
            }
            if let Some(v) = min_nonblack_pct {
                cfg.quality.min_nonblack_pct = v;
            }
            if let Some(v) = min_p2p {
                cfg.quality.min_p2p = v;
            }
            if let Some(v) = min_var {
                cfg.quality.min_var = v;
            }
            if let Some(v) = only_mods {
                cfg.only_mods = v;
            }
            if keep_localizer {
                cfg.drop_localizer = false;
            }
            if drop_derived {
                cfg.drop_derived = true;
            }
            if no_clahe {
                cfg.clahe = false;
            }
            if gray {
                cfg.rgb = false;
            }
            if clean {
                clean_after_input_check(&input, &output)?;
            }

            let summary = convert::run(&input, &output, &cfg)?;
            println!("Files scanned:   {}", summary.files_scanned);
            println!("Images saved:    {}", summary.images_saved);
            println!("Frames rejected: {}", summary.frames_rejected);
            for (reason, count) in &summary.skipped {
                println!("  skipped ({}): {}", reason, count);
            }
            write_report_if(report.as_deref(), &summary)?;
        }
        Commands::ClassifySeries {
            input,
            output,
            move_files,
            hardlink,
            symlink,
            dry_run,
            progress_step,
            report,
        } => {
            let mode = if move_files {
                TransferMode::Move
            } else if hardlink {
                TransferMode::Hardlink
            } else if symlink {
                TransferMode::Symlink
            } else {
                TransferMode::Copy
            };
            let options = series::ClassifyOptions {
                mode,
                dry_run,
                progress_step,
            };
            let summary = series::run(&input, &output, &options)?;
            println!("Series:      {}", summary.series);
            println!("Total files: {}", summary.total());
            println!("  transversal: {}", summary.transversal);
            println!("  3d:          {}", summary.volume_3d);
            if summary.failed > 0 {
                println!("  failed:      {}", summary.failed);
            }
            write_report_if(report.as_deref(), &summary)?;
        }
        Commands::Redact {
            inputs,
            output,
            square,
            folder_pattern,
            clean,
        } => {
            let folder_pattern = folder_pattern
                .map(|p| Regex::new(&p).with_context(|| format!("Invalid folder pattern {:?}", p)))
                .transpose()?;
            let options = redact::RedactOptions {
                square,
                folder_pattern,
                clean,
            };
            print_counts(&redact::run(&inputs, &output, &options)?);
        }
        Commands::Resize {
            inputs,
            output,
            mode,
            size,
            zoom,
        } => {
            let mut options = resize::ResizeOptions::new(mode, size);
            options.zoom = zoom;
            print_counts(&resize::run(&inputs, &output, &options)?);
        }
        Commands::Organize {
            input,
            output,
            move_files,
            mirror,
        } => {
            let options = organize::OrganizeOptions {
                mode: if move_files {
                    TransferMode::Move
                } else {
                    TransferMode::Copy
                },
                mirror,
            };
            let summary = organize::run(&input, &output, &options)?;
            for (class, count) in &summary.placed {
                println!("{}: {} file(s)", class, count);
            }
            if summary.skipped > 0 {
                println!("skipped: {}", summary.skipped);
            }
        }
        Commands::Split {
            input,
            output,
            classes,
            train,
            val,
            test,
            seed,
            clean,
        } => {
            let ratios = split::FileSplitRatios { train, val, test };
            ratios.validate()?;
            if clean {
                clean_after_input_check(&input, &output)?;
            }
            let report = split::split_files(&input, &output, &classes, ratios, seed)?;
            for (class, counts) in &report {
                println!(
                    "{}: train={} val={} test={} skipped={}",
                    class, counts.train, counts.val, counts.test, counts.skipped
                );
            }
        }
        Commands::SplitPatients {
            root,
            out,
            val,
            test,
            holdout,
            seed,
            copy,
            flatten,
            report,
        } => {
            let options = split::PatientSplitOptions {
                val,
                test,
                holdout,
                seed,
                copy,
                flatten,
            };
            let summary = split::split_patients(&root, &out, &options)?;
            println!("Total images: {}", summary.total_images);
            if summary.skipped > 0 {
                println!("Skipped: {}", summary.skipped);
            }
            for (split_name, per_class) in &summary.per_split {
                println!("[{}]", split_name);
                for (class, count) in per_class {
                    println!("  {}: {}", class, count);
                }
            }
            println!("Manifest: {}", out.join("manifest.csv").display());
            write_report_if(report.as_deref(), &summary)?;
        }
        Commands::Augment {
            train_root,
            output,
            seed,
        } => {
            let options = augment::AugmentOptions {
                seed,
                output,
                ..augment::AugmentOptions::default()
            };
            print_counts(&augment::run(&train_root, &options)?);
        }
        Commands::Pivots {
            base,
            list,
            output,
            radius,
            mode,
            anchors,
            extensions,
        } => {
            let output = output.unwrap_or_else(|| {
                let mut name = base.as_os_str().to_owned();
                name.push("_modificado");
                PathBuf::from(name)
            });
            let pivots = pivot::load_pivots(&list, &anchors)?;
            let options = pivot::PivotOptions {
                radius,
                mode,
                extensions: extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect(),
            };
            let summary = pivot::copy_windows(&base, &output, &pivots, &options)?;
            println!(
                "Pivots: {} | missing: {} | failed: {} | copied: {} | already present: {}",
                summary.pivots,
                summary.missing,
                summary.failed,
                summary.copied,
                summary.already_present
            );
        }
        Commands::Gif {
            base,
            folders,
            frame_ms,
            background,
        } => {
            let [r, g, b] = <[u8; 3]>::try_from(background.as_slice())
                .context("Background must have exactly three components")?;
            let options = animation::GifOptions {
                frame_ms,
                background: [r, g, b],
            };
            for gif in animation::run(&base, &folders, &options)? {
                println!("GIF written: {}", gif.display());
            }
        }
        Commands::Anonymize { input, output } => {
            let counts = anonymize::run(&input, output.as_deref())?;
            println!(
                "Anonymized: {} | skipped: {}",
                counts.processed, counts.skipped
            );
        }
        Commands::Inspect { root, count } => {
            let files = inspect::inspect(&root, count.max(1))?;
            print!("{}", inspect::render(&files));
        }
    }

    Ok(())
}

fn print_counts(report: &BTreeMap<String, BatchCounts>) {
    for (name, counts) in report {
        println!(
            "{}: processed={} skipped={}",
            name, counts.processed, counts.skipped
        );
    }
}

/// Clears `output` only once `input` is known to exist, so a mistyped input keeps old results.
fn clean_after_input_check(input: &Path, output: &Path) -> Result<()> {
    if !input.is_dir() {
        return Err(PrepError::MissingInput(input.to_path_buf()).into());
    }
    batch::clean_dir(output)
}

fn write_report_if<T: Serialize>(path: Option<&Path>, report: &T) -> Result<()> {
    if let Some(path) = path {
        models::write_report(path, report)?;
        println!("Report: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn transfer_flags_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "iml-prep",
            "classify-series",
            "in",
            "-o",
            "out",
            "--move",
            "--symlink",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn dicom2png_flags_parse() {
        let cli = Cli::try_parse_from([
            "iml-prep",
            "-v",
            "dicom2png",
            "in",
            "out",
            "--split-by",
            "series+bodypart",
            "--frames",
            "middle",
        ])
        .expect("parse");
        assert!(cli.verbose);
        match cli.command {
            Commands::Dicom2png {
                split_by, frames, ..
            } => {
                assert_eq!(split_by, Some(SplitBy::SeriesBodyPart));
                assert_eq!(frames, Some(FrameSelection::Middle));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn clean_keeps_output_when_input_is_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&output).expect("mkdir");
        std::fs::write(output.join("previous.png"), b"x").expect("write");

        let missing = dir.path().join("typo");
        let args: Vec<std::ffi::OsString> = vec![
            "iml-prep".into(),
            "dicom2png".into(),
            missing.into_os_string(),
            output.clone().into_os_string(),
            "--clean".into(),
        ];
        let cli = Cli::try_parse_from(args).expect("parse");
        let err = run(cli).expect_err("missing input");
        assert!(err.to_string().contains("input directory not found"));
        assert!(output.join("previous.png").exists());
    }
}
