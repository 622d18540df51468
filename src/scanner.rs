//! Directory scanning
//!
//! Lists the top level of an input directory and returns its regular files in
//! byte-wise file name order. That order is the join order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{JoinError, Result};

/// Extensions accepted by [`ScanFilter::Extensions`] when none are configured
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "mkv", "avi", "webm", "wmv", "flv", "mpg", "mpeg", "ts", "mts", "3gp",
    "ogv",
];

/// A regular file found by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    pub path: PathBuf,
    /// Position in the sorted listing
    pub index: usize,
}

impl MediaFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Which regular files count as candidates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "extensions", rename_all = "snake_case")]
pub enum ScanFilter {
    /// Every regular file; the decode step rejects non-media individually
    #[default]
    Any,
    /// Case-insensitive extension allow-list
    Extensions(Vec<String>),
    /// Content sniffing: keep files whose magic bytes identify a video
    Sniff,
}

impl ScanFilter {
    pub fn video_extensions() -> Self {
        ScanFilter::Extensions(DEFAULT_VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect())
    }

    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            ScanFilter::Any => true,
            ScanFilter::Extensions(allowed) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| allowed.iter().any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(ext)))
                .unwrap_or(false),
            ScanFilter::Sniff => match infer::get_from_path(path) {
                Ok(Some(kind)) => kind.matcher_type() == infer::MatcherType::Video,
                Ok(None) => false,
                Err(e) => {
                    warn!("Cannot sniff {}: {}", path.display(), e);
                    false
                }
            },
        }
    }
}

/// List `dir` and return its regular files that pass `filter`, sorted by name.
///
/// An empty result is not an error here; the joiner decides what that means.
pub fn scan_directory(dir: &Path, filter: &ScanFilter) -> Result<Vec<MediaFile>> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| JoinError::DirectoryUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries: Vec<(std::ffi::OsString, PathBuf)> = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        // Follows symlinks
        if !path.is_file() {
            continue;
        }
        if !filter.accepts(&path) {
            debug!("Filtered out {}", path.display());
            continue;
        }
        entries.push((entry.file_name(), path));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, (_, path))| MediaFile { path, index })
        .collect())
}
