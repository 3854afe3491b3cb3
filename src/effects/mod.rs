// SPDX-License-Identifier: GPL-3.0-only

//! Effect engine interface
//!
//! The engine is initialized once per process. Per-resolution working memory lives
//! in [`EffectEngine::Buffers`], which the relay loop owns and reallocates only
//! when the capture geometry changes.

pub mod composite;
pub mod software;

pub use software::SoftwareEngine;

use crate::errors::{EffectError, InitError};
use crate::state::EffectMode;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Trade-off between matte quality and per-frame cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PerfMode {
    #[default]
    Quality,
    Performance,
}

impl PerfMode {
    /// Map the `--mode 0|1` command-line value
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(PerfMode::Quality),
            1 => Some(PerfMode::Performance),
            _ => None,
        }
    }
}

/// Per-frame parameters that are not part of the mode
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectParams<'a> {
    pub blur_strength: f32,
    /// Replacement background, already scaled to the frame size
    pub background: Option<&'a RgbImage>,
}

/// A stateful frame processor
pub trait EffectEngine {
    /// Working memory sized to one resolution
    type Buffers;

    /// Load models and tuning; failure here is fatal for the process
    fn init(model_dir: Option<&Path>, perf_mode: PerfMode) -> Result<Self, InitError>
    where
        Self: Sized;

    /// Allocate working memory for `width`x`height` frames
    fn allocate(&mut self, width: u32, height: u32) -> Result<Self::Buffers, EffectError>;

    /// Geometry the buffers were allocated for
    fn buffer_size(buffers: &Self::Buffers) -> (u32, u32);

    /// Produce the composited frame for `mode`
    fn process(
        &mut self,
        frame: &RgbImage,
        mode: EffectMode,
        params: &EffectParams<'_>,
        buffers: &mut Self::Buffers,
    ) -> Result<RgbImage, EffectError>;
}

/// Reject frames that do not match the allocated buffers
pub fn check_geometry(frame: &RgbImage, buffers: (u32, u32)) -> Result<(), EffectError> {
    let frame_size = frame.dimensions();
    if frame_size != buffers {
        return Err(EffectError::GeometryMismatch {
            frame: frame_size,
            buffers,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_mode_index() {
        assert_eq!(PerfMode::from_index(0), Some(PerfMode::Quality));
        assert_eq!(PerfMode::from_index(1), Some(PerfMode::Performance));
        assert_eq!(PerfMode::from_index(2), None);
    }

    #[test]
    fn test_check_geometry() {
        let frame = RgbImage::new(4, 2);
        assert!(check_geometry(&frame, (4, 2)).is_ok());
        assert_eq!(
            check_geometry(&frame, (2, 4)),
            Err(EffectError::GeometryMismatch {
                frame: (4, 2),
                buffers: (2, 4)
            })
        );
    }
}
