//! Copies captured previews out of the staging directory into the skin
//! folders. One failing skin never blocks the others.

use image::imageops::FilterType;
use std::path::{Path, PathBuf};

/// Published previews are downscaled to the stock size.
pub const PREVIEW_WIDTH: u32 = 1022;
pub const PREVIEW_HEIGHT: u32 = 575;

pub const PREVIEW_FILENAME: &str = "preview.jpg";

#[derive(Debug, Default)]
pub struct CommitReport {
    /// Skin ids whose preview was replaced.
    pub applied: Vec<String>,
    /// Skin id with the reason the copy failed.
    pub failed: Vec<(String, String)>,
    /// Staging files whose stem matches no skin folder.
    pub skipped: Vec<PathBuf>,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies every staged capture whose filename stem matches a skin folder
/// under `<car>/skins/`. With `resize` the image is decoded and scaled to
/// 1022×575 before being written; otherwise the file is copied as-is.
pub fn apply_previews(staging_dir: &Path, car_dir: &Path, resize: bool) -> CommitReport {
    let mut report = CommitReport::default();
    let skins_dir = car_dir.join("skins");

    let entries = match std::fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("cannot read staging directory {}: {e}", staging_dir.display());
            return report;
        }
    };

    let mut staged: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    staged.sort();

    for source in staged {
        let skin_id = match source.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_lowercase(),
            None => {
                report.skipped.push(source);
                continue;
            }
        };
        let skin_dir = skins_dir.join(&skin_id);
        if !skin_dir.is_dir() {
            log::debug!("no skin folder for staged file {}", source.display());
            report.skipped.push(source);
            continue;
        }

        let destination = skin_dir.join(PREVIEW_FILENAME);
        match apply_one(&source, &destination, resize) {
            Ok(()) => report.applied.push(skin_id),
            Err(e) => {
                log::warn!("cannot update preview for {skin_id}: {e}");
                report.failed.push((skin_id, e.to_string()));
            }
        }
    }

    report.applied.sort();
    report
}

fn apply_one(source: &Path, destination: &Path, resize: bool) -> anyhow::Result<()> {
    if resize {
        let image = image::open(source)?;
        let scaled = if image.width() != PREVIEW_WIDTH || image.height() != PREVIEW_HEIGHT {
            image.resize_exact(PREVIEW_WIDTH, PREVIEW_HEIGHT, FilterType::Lanczos3)
        } else {
            image
        };
        scaled.to_rgb8().save(destination)?;
    } else {
        std::fs::copy(source, destination)?;
    }
    Ok(())
}
