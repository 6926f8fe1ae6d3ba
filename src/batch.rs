//
// batch.rs
// IML-Prep
//
// Shared directory enumeration and file placement used by every batch command.
//

use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use walkdir::WalkDir;

/// Extensions treated as raster images by the dataset commands.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

pub fn is_image_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Every regular file below `root` (recursive), sorted by path.
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

pub fn collect_images(root: &Path) -> Vec<PathBuf> {
    collect_files(root)
        .into_iter()
        .filter(|p| is_image_ext(p))
        .collect()
}

/// Image files directly inside `dir` (not recursive), sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && is_image_ext(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Immediate sub-directories of `dir`, sorted by name.
pub fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Directory of `file` relative to `root`; `.` when it cannot be expressed relatively.
pub fn relative_dir(file: &Path, root: &Path) -> PathBuf {
    file.parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

pub fn file_name_str(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Removes `dir` if it exists so a run starts from an empty output tree.
pub fn clean_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        tracing::warn!(dir = %dir.display(), "output directory exists, removing");
        fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {:?}", dir))?;
    }
    Ok(())
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// Saves `img`, format from the extension; JPEG targets are encoded at `jpeg_quality`.
pub fn save_image(img: &DynamicImage, path: &Path, jpeg_quality: u8) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    if is_jpeg(path) {
        let file = fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), jpeg_quality);
        DynamicImage::ImageRgb8(img.to_rgb8())
            .write_with_encoder(encoder)
            .with_context(|| format!("Failed to encode {:?}", path))?;
    } else {
        img.save(path)
            .with_context(|| format!("Failed to write {:?}", path))?;
    }
    Ok(())
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
    Hardlink,
    Symlink,
}

/// Places `src` at `dst` according to `mode`, creating parent directories.
pub fn place_file(src: &Path, dst: &Path, mode: TransferMode) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match mode {
        TransferMode::Copy => fs::copy(src, dst).map(|_| ()),
        TransferMode::Move => move_file(src, dst),
        TransferMode::Hardlink => fs::hard_link(src, dst),
        TransferMode::Symlink => {
            // Replace so rebuilding a split over an existing tree is idempotent.
            if dst.symlink_metadata().is_ok() {
                fs::remove_file(dst)?;
            }
            let target = fs::canonicalize(src)?;
            symlink(&target, dst)
        }
    }
}

fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // rename cannot cross filesystems
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn image_extension_check_is_case_insensitive() {
        assert!(is_image_ext(Path::new("a/b/c.JPG")));
        assert!(is_image_ext(Path::new("c.tiff")));
        assert!(!is_image_ext(Path::new("c.dcm")));
        assert!(!is_image_ext(Path::new("IM0001")));
    }

    #[test]
    fn relative_dir_strips_root() {
        let rel = relative_dir(Path::new("/data/in/F/26F/IM1"), Path::new("/data/in"));
        assert_eq!(rel, PathBuf::from("F/26F"));
        assert_eq!(relative_dir(Path::new("/data/in/x.dcm"), Path::new("/data/in")), PathBuf::new());
    }

    #[test]
    fn place_file_modes() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src.txt");
        fs::write(&src, b"payload").expect("write");

        let copied = dir.path().join("out/copy/src.txt");
        place_file(&src, &copied, TransferMode::Copy).expect("copy");
        assert_eq!(fs::read(&copied).expect("read"), b"payload");

        let linked = dir.path().join("out/link/src.txt");
        place_file(&src, &linked, TransferMode::Symlink).expect("symlink");
        place_file(&src, &linked, TransferMode::Symlink).expect("symlink again");
        assert!(linked.symlink_metadata().expect("meta").file_type().is_symlink());

        let moved = dir.path().join("out/move/src.txt");
        place_file(&src, &moved, TransferMode::Move).expect("move");
        assert!(!src.exists());
        assert!(moved.exists());
    }

    #[test]
    fn save_image_handles_jpeg_and_png() {
        let dir = tempdir().expect("tempdir");
        let img = DynamicImage::new_rgba8(8, 6);
        let jpg = dir.path().join("nested/a.JPG");
        save_image(&img, &jpg, 95).expect("jpeg");
        let png = dir.path().join("b.png");
        save_image(&img, &png, 95).expect("png");
        assert_eq!(image::open(&jpg).expect("open").width(), 8);
        assert_eq!(image::open(&png).expect("open").height(), 6);
    }

    #[test]
    fn collect_files_is_recursive_and_sorted() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("b/c")).expect("mkdir");
        fs::write(dir.path().join("b/c/2.png"), b"x").expect("write");
        fs::write(dir.path().join("a.png"), b"x").expect("write");
        fs::write(dir.path().join("b/notes.txt"), b"x").expect("write");

        let files = collect_files(dir.path());
        assert_eq!(files.len(), 3);
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(collect_images(dir.path()).len(), 2);
    }
}
