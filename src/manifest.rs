//! Frame timing manifest in the ffmpeg concat-demuxer format

use crate::{Error, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// One manifest line pair: a frame file and how long it stays on screen
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// Ordered (frame, duration) list consumed by the encoder.
///
/// Every frame appears once with the reveal duration; the last frame is then
/// appended a second time with the hold duration.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTimingManifest {
    entries: Vec<ManifestEntry>,
}

impl FrameTimingManifest {
    pub fn new(frames: &[PathBuf], frame_duration_secs: f64, hold_duration_secs: f64) -> Result<Self> {
        let Some(last) = frames.last() else {
            return Err(Error::EncodeFailed("No frames to encode".into()));
        };

        let mut entries: Vec<ManifestEntry> = frames
            .iter()
            .map(|path| ManifestEntry {
                path: path.clone(),
                duration_secs: frame_duration_secs,
            })
            .collect();
        entries.push(ManifestEntry {
            path: last.clone(),
            duration_secs: hold_duration_secs,
        });

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Sum of all display durations, in seconds
    pub fn total_duration_secs(&self) -> f64 {
        self.entries.iter().map(|e| e.duration_secs).sum()
    }

    /// Render as a concat script (`file '<path>'` / `duration <secs>` lines).
    pub fn to_concat_script(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "file '{}'", quote_path(&entry.path));
            let _ = writeln!(out, "duration {}", entry.duration_secs);
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_concat_script()).await?;
        Ok(())
    }
}

// Single quotes cannot appear inside a quoted concat path; close the quote,
// emit an escaped quote and reopen.
fn quote_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}
