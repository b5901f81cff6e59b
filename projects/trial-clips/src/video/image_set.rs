// Camera image assets
//
// Frame order comes only from the number embedded in each file name
// (`<prefix>_<frame>_..._camN.jpg`); directory listing order is never used.

use crate::error::FormatError;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// Delimiter and field position of the frame number in an asset name.
pub const NAME_DELIMITER: char = '_';
pub const FRAME_FIELD: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageAsset {
    pub frame_number: usize,
    pub file_name: String,
}

impl ImageAsset {
    pub fn parse(file_name: &str) -> Result<Self, FormatError> {
        let frame_number = file_name
            .split(NAME_DELIMITER)
            .nth(FRAME_FIELD)
            .and_then(|field| field.parse::<usize>().ok())
            .ok_or_else(|| FormatError::MalformedImageName {
                name: file_name.to_string(),
                field: FRAME_FIELD,
            })?;
        Ok(Self {
            frame_number,
            file_name: file_name.to_string(),
        })
    }
}

/// File-name suffix identifying a camera's assets, e.g. `cam0.jpg`.
pub fn camera_suffix(camera: usize, extension: &str) -> String {
    format!("cam{}.{}", camera, extension)
}

/// All assets of one camera in one session, sorted by frame number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    assets: Vec<ImageAsset>,
}

impl ImageSet {
    /// Parses every name; a single malformed name fails the whole set.
    pub fn from_names<I, S>(names: I) -> Result<Self, FormatError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut assets = names
            .into_iter()
            .map(|n| ImageAsset::parse(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        // (frame_number, file_name) order, independent of input order.
        assets.sort();
        Ok(Self { assets })
    }

    /// Lists `dir` (non-recursively) for files ending in `suffix`. A
    /// directory that cannot be listed is an error, not an empty set.
    pub fn scan(dir: &Path, suffix: &str) -> Result<Self> {
        let mut names = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to list image directory {:?}", dir))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(suffix) {
                    names.push(name.to_string());
                }
            }
        }

        let set = Self::from_names(&names)
            .with_context(|| format!("Image assets in {:?} break the naming convention", dir))?;

        let distinct_frames: HashSet<usize> = set.assets.iter().map(|a| a.frame_number).collect();
        if distinct_frames.len() != set.len() {
            tracing::warn!(
                "{:?}: {} '{}' assets share {} frame numbers, keeping the first name of each",
                dir,
                set.len(),
                suffix,
                distinct_frames.len()
            );
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    #[cfg(test)]
    pub fn assets(&self) -> &[ImageAsset] {
        &self.assets
    }

    /// Assets with `start <= frame_number <= end`, ascending, one per frame
    /// number. Among assets sharing a frame number the first in
    /// `(frame_number, file_name)` order wins, which also drops repeated
    /// file names.
    pub fn select(&self, start: usize, end: usize) -> Vec<ImageAsset> {
        if start > end {
            return Vec::new();
        }

        let first = self.assets.partition_point(|a| a.frame_number < start);
        let mut selected: Vec<ImageAsset> = Vec::new();

        for asset in &self.assets[first..] {
            if asset.frame_number > end {
                break;
            }
            if selected.last().map(|a| a.frame_number) == Some(asset.frame_number) {
                continue;
            }
            selected.push(asset.clone());
        }
        selected
    }
}
