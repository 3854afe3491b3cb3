// SPDX-License-Identifier: GPL-3.0-only

//! Physical camera capture
//!
//! [`CaptureSource`] owns zero or one open capture stream and is driven
//! exclusively by the relay loop. Device access goes through the
//! [`CaptureBackend`] trait so the relay can run against V4L2 or a test double.

pub mod v4l2;

pub use v4l2::V4l2Backend;

use crate::constants::MAX_CONSECUTIVE_READ_FAILURES;
use crate::errors::{CaptureError, CaptureResult, should_log_failure};
use crate::frame::VideoFrame;
use crate::state::CameraSettings;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An open capture stream
pub trait CaptureStream: Send {
    /// Geometry the device actually negotiated
    fn geometry(&self) -> (u32, u32);

    /// Block until the next frame arrives (bounded by the device timeout)
    fn read_frame(&mut self) -> CaptureResult<VideoFrame>;
}

/// Factory for capture streams
pub trait CaptureBackend: Send {
    /// Open `path` for capture, asking for `request`
    fn open(&mut self, path: &str, request: CameraSettings)
    -> CaptureResult<Box<dyn CaptureStream>>;

    /// Whether `path` looks like a usable capture device
    fn probe(&mut self, path: &str) -> bool;
}

/// `/dev/video0` through `/dev/video{last_index}`
pub fn candidate_paths(last_index: u32) -> Vec<String> {
    (0..=last_index).map(|i| format!("/dev/video{}", i)).collect()
}

fn same_device(a: &str, b: &Path) -> bool {
    let canon_a = std::fs::canonicalize(a).unwrap_or_else(|_| PathBuf::from(a));
    let canon_b = std::fs::canonicalize(b).unwrap_or_else(|_| b.to_path_buf());
    canon_a == canon_b
}

/// Candidates in probe order with the virtual sink removed
pub fn filter_candidates(candidates: &[String], exclude: &Path) -> Vec<String> {
    candidates
        .iter()
        .filter(|c| !same_device(c, exclude))
        .cloned()
        .collect()
}

/// List the candidates the backend accepts, lowest index first
pub fn probe_devices(
    backend: &mut dyn CaptureBackend,
    candidates: &[String],
    exclude: &Path,
) -> Vec<String> {
    filter_candidates(candidates, exclude)
        .into_iter()
        .filter(|path| backend.probe(path))
        .collect()
}

/// Demand-driven wrapper around one capture device
pub struct CaptureSource {
    stream: Option<Box<dyn CaptureStream>>,
    backend: Box<dyn CaptureBackend>,
    candidates: Vec<String>,
    exclude: PathBuf,
    device: Option<String>,
    consecutive_failures: u32,
    total_failures: u64,
}

impl CaptureSource {
    /// `candidates` is the auto-detect order; `exclude` is the virtual sink device
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        candidates: Vec<String>,
        exclude: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stream: None,
            backend,
            candidates,
            exclude: exclude.into(),
            device: None,
            consecutive_failures: 0,
            total_failures: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Negotiated geometry of the open stream
    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(|s| s.geometry())
    }

    /// Path of the open device
    pub fn device_path(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Open the explicit device, or the first auto-detect candidate that opens
    ///
    /// Returns the negotiated geometry. Any previously open stream is released first.
    pub fn open(
        &mut self,
        explicit: Option<&str>,
        request: CameraSettings,
    ) -> CaptureResult<(u32, u32)> {
        self.close();

        let paths = match explicit {
            Some(path) => vec![path.to_string()],
            None => filter_candidates(&self.candidates, &self.exclude),
        };

        let mut last_err = CaptureError::NoDevice;
        for path in paths {
            match self.backend.open(&path, request) {
                Ok(stream) => {
                    let (width, height) = stream.geometry();
                    info!(
                        device = %path,
                        width,
                        height,
                        requested_width = request.width,
                        requested_height = request.height,
                        fps = request.fps,
                        "Capture opened"
                    );
                    self.stream = Some(stream);
                    self.device = Some(path);
                    self.consecutive_failures = 0;
                    return Ok((width, height));
                }
                Err(e) => {
                    debug!(device = %path, error = %e, "Capture candidate rejected");
                    last_err = e;
                }
            }
        }

        if explicit.is_none() {
            last_err = CaptureError::NoDevice;
        }
        Err(last_err)
    }

    /// Read one frame
    ///
    /// After too many consecutive failures the stream is dropped so the relay
    /// reopens it (covers unplugged cameras).
    pub fn read_frame(&mut self) -> CaptureResult<VideoFrame> {
        let stream = self.stream.as_mut().ok_or(CaptureError::NotOpen)?;
        match stream.read_frame() {
            Ok(frame) => {
                self.consecutive_failures = 0;
                Ok(frame)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.total_failures += 1;
                if should_log_failure(self.total_failures) {
                    warn!(
                        error = %e,
                        total = self.total_failures,
                        "Capture read failed"
                    );
                }
                if self.consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    warn!(
                        device = ?self.device,
                        failures = self.consecutive_failures,
                        "Capture keeps failing, releasing device"
                    );
                    self.close();
                }
                Err(e)
            }
        }
    }

    /// Release the device handle, if any
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(device = ?self.device, "Capture released");
        }
        self.device = None;
        self.consecutive_failures = 0;
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct FakeStream(u32, u32, bool);

    impl CaptureStream for FakeStream {
        fn geometry(&self) -> (u32, u32) {
            (self.0, self.1)
        }

        fn read_frame(&mut self) -> CaptureResult<VideoFrame> {
            if self.2 {
                Err(CaptureError::EmptyFrame)
            } else {
                Ok(VideoFrame::new(RgbImage::new(self.0, self.1)))
            }
        }
    }

    /// Opens only the listed paths
    struct FakeBackend {
        openable: Vec<&'static str>,
        failing_reads: bool,
    }

    impl CaptureBackend for FakeBackend {
        fn open(
            &mut self,
            path: &str,
            request: CameraSettings,
        ) -> CaptureResult<Box<dyn CaptureStream>> {
            if self.openable.contains(&path) {
                Ok(Box::new(FakeStream(
                    request.width,
                    request.height,
                    self.failing_reads,
                )))
            } else {
                Err(CaptureError::OpenFailed {
                    path: path.to_string(),
                    reason: "busy".into(),
                })
            }
        }

        fn probe(&mut self, path: &str) -> bool {
            self.openable.contains(&path)
        }
    }

    fn backend(openable: Vec<&'static str>, failing_reads: bool) -> Box<FakeBackend> {
        Box::new(FakeBackend {
            openable,
            failing_reads,
        })
    }

    #[test]
    fn test_candidates_exclude_sink() {
        let list = filter_candidates(&candidate_paths(3), Path::new("/dev/video2"));
        assert_eq!(list, vec!["/dev/video0", "/dev/video1", "/dev/video3"]);
    }

    #[test]
    fn test_auto_detect_lowest_index_wins() {
        let mut source = CaptureSource::new(
            backend(vec!["/dev/video3", "/dev/video1"], false),
            candidate_paths(9),
            "/dev/video10",
        );
        let geometry = source.open(None, CameraSettings::default()).unwrap();
        assert_eq!(geometry, (1280, 720));
        assert_eq!(source.device_path(), Some("/dev/video1"));
    }

    #[test]
    fn test_no_device() {
        let mut source = CaptureSource::new(backend(vec![], false), candidate_paths(2), "/dev/video10");
        assert!(matches!(
            source.open(None, CameraSettings::default()),
            Err(CaptureError::NoDevice)
        ));
        assert!(!source.is_open());
    }

    #[test]
    fn test_explicit_device_not_probed() {
        let mut source = CaptureSource::new(
            backend(vec!["/dev/video0"], false),
            candidate_paths(9),
            "/dev/video10",
        );
        assert!(matches!(
            source.open(Some("/dev/video5"), CameraSettings::default()),
            Err(CaptureError::OpenFailed { .. })
        ));
    }

    #[test]
    fn test_repeated_failures_release_device() {
        let mut source = CaptureSource::new(
            backend(vec!["/dev/video0"], true),
            candidate_paths(0),
            "/dev/video10",
        );
        source.open(None, CameraSettings::default()).unwrap();
        for _ in 0..MAX_CONSECUTIVE_READ_FAILURES {
            assert!(source.read_frame().is_err());
        }
        assert!(!source.is_open());
        assert!(matches!(source.read_frame(), Err(CaptureError::NotOpen)));
    }
}
