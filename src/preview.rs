// SPDX-License-Identifier: GPL-3.0-only

//! Local preview output
//!
//! The control panel shows the latest processed frame by polling a JPEG file. The
//! file is written to a temporary name and renamed so readers never see a torn
//! image. Failures are logged and otherwise ignored.

use crate::constants::PREVIEW_JPEG_QUALITY;
use crate::errors::should_log_failure;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Receives processed frames for local display
pub trait PreviewSink: Send {
    /// Publish a frame; must not block the relay for long
    fn show(&mut self, frame: &RgbImage);

    /// Withdraw whatever is currently shown
    fn clear(&mut self);
}

/// Preview that discards everything (headless runs)
#[derive(Debug, Default)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn show(&mut self, _frame: &RgbImage) {}

    fn clear(&mut self) {}
}

/// Writes each frame as a JPEG file with an atomic rename
#[derive(Debug)]
pub struct JpegPreviewWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    quality: u8,
    failures: u64,
}

impl JpegPreviewWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
            quality: PREVIEW_JPEG_QUALITY,
            failures: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, frame: &RgbImage) -> Result<(), String> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        encoder
            .encode_image(frame)
            .map_err(|e| format!("Failed to encode JPEG: {}", e))?;
        std::fs::write(&self.tmp_path, &buf)
            .map_err(|e| format!("Failed to write {}: {}", self.tmp_path.display(), e))?;
        std::fs::rename(&self.tmp_path, &self.path)
            .map_err(|e| format!("Failed to rename to {}: {}", self.path.display(), e))
    }
}

impl PreviewSink for JpegPreviewWriter {
    fn show(&mut self, frame: &RgbImage) {
        if let Err(e) = self.write(frame) {
            self.failures += 1;
            if should_log_failure(self.failures) {
                warn!(error = %e, failures = self.failures, "Preview write failed");
            }
        }
    }

    fn clear(&mut self) {
        for path in [&self.path, &self.tmp_path] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Preview removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove preview"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_write_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut preview = JpegPreviewWriter::new(&path);

        preview.show(&RgbImage::from_pixel(64, 48, Rgb([90, 120, 200])));
        assert!(path.exists());
        assert!(!dir.path().join("preview.jpg.tmp").exists());

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));

        preview.clear();
        assert!(!path.exists());
        // Clearing twice is fine
        preview.clear();
    }

    #[test]
    fn test_unwritable_path_is_swallowed() {
        let mut preview = JpegPreviewWriter::new("/nonexistent-dir/preview.jpg");
        preview.show(&RgbImage::new(8, 8));
        assert_eq!(preview.failures, 1);
    }
}
