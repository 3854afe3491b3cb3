// SPDX-License-Identifier: GPL-3.0-only

//! CPU effect engine
//!
//! Segments the subject with a colour-distance matte against a background model
//! sampled from the frame border, smoothed over time with the previous matte. The
//! compositing modes then blend the frame over the chosen backdrop.

use super::composite::{self, Matte};
use super::{EffectEngine, EffectParams, PerfMode, check_geometry};
use crate::errors::{EffectError, InitError};
use crate::state::EffectMode;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Tuning file looked up in the model directory
pub const TUNING_FILE: &str = "matte.json";

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
/// Used by background mode until an image has been selected
const FALLBACK_BACKGROUND: Rgb<u8> = Rgb([0, 200, 0]);

/// Matte thresholds, all colour distances normalized to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatteTuning {
    /// Distance from the background model below which a pixel is background
    pub threshold: f32,
    /// Width of the ramp from background to subject
    pub softness: f32,
    /// Weight of the previous matte in the temporal filter
    pub temporal: f32,
    /// Border strip (pixels) sampled for the background model
    pub border: u32,
}

impl Default for MatteTuning {
    fn default() -> Self {
        Self {
            threshold: 0.12,
            softness: 0.10,
            temporal: 0.6,
            border: 8,
        }
    }
}

impl MatteTuning {
    fn validate(&self) -> Result<(), InitError> {
        let ok = (0.0..=1.0).contains(&self.threshold)
            && self.softness > 0.0
            && self.softness.is_finite()
            && (0.0..1.0).contains(&self.temporal)
            && self.border > 0;
        if ok {
            Ok(())
        } else {
            Err(InitError::InvalidModel(format!(
                "tuning values out of range: {:?}",
                self
            )))
        }
    }

    fn load(model_dir: &Path) -> Result<Self, InitError> {
        if !model_dir.is_dir() {
            return Err(InitError::ModelDirectory(format!(
                "{} is not a directory",
                model_dir.display()
            )));
        }

        let path = model_dir.join(TUNING_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No tuning file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .map_err(|e| InitError::InvalidModel(format!("{}: {}", path.display(), e)))?;
        let tuning: Self = serde_json::from_str(&text)
            .map_err(|e| InitError::InvalidModel(format!("{}: {}", path.display(), e)))?;
        tuning.validate()?;
        Ok(tuning)
    }
}

/// Per-resolution working memory
#[derive(Debug, Clone)]
pub struct SoftwareBuffers {
    width: u32,
    height: u32,
    matte: Matte,
    primed: bool,
}

impl SoftwareBuffers {
    /// Most recent matte
    pub fn matte(&self) -> &Matte {
        &self.matte
    }
}

/// CPU implementation of every effect mode
#[derive(Debug, Clone)]
pub struct SoftwareEngine {
    perf_mode: PerfMode,
    tuning: MatteTuning,
}

impl SoftwareEngine {
    pub fn tuning(&self) -> &MatteTuning {
        &self.tuning
    }

    pub fn perf_mode(&self) -> PerfMode {
        self.perf_mode
    }

    fn matte_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self.perf_mode {
            PerfMode::Quality => (width, height),
            PerfMode::Performance => ((width / 2).max(1), (height / 2).max(1)),
        }
    }

    /// Update the matte in `buffers` from `frame`
    fn estimate_matte(&self, frame: &RgbImage, buffers: &mut SoftwareBuffers) {
        let (mw, mh) = (buffers.matte.width, buffers.matte.height);
        let scaled;
        let work = if frame.dimensions() == (mw, mh) {
            frame
        } else {
            scaled = imageops::resize(frame, mw, mh, FilterType::Triangle);
            &scaled
        };

        let model = border_mean(work, self.tuning.border);
        let t = self.tuning;
        let keep = if buffers.primed { t.temporal } else { 0.0 };
        const MAX_DIST: f32 = 441.672_96; // 255 * sqrt(3)

        for (alpha, px) in buffers.matte.alpha.iter_mut().zip(work.pixels()) {
            let d = ((px[0] as f32 - model[0]).powi(2)
                + (px[1] as f32 - model[1]).powi(2)
                + (px[2] as f32 - model[2]).powi(2))
            .sqrt()
                / MAX_DIST;
            let x = ((d - t.threshold) / t.softness).clamp(0.0, 1.0);
            let fresh = x * x * (3.0 - 2.0 * x);
            *alpha = keep * *alpha + (1.0 - keep) * fresh;
        }
        buffers.primed = true;
    }

    fn blurred(&self, frame: &RgbImage, strength: f32) -> RgbImage {
        let sigma = 1.0 + 15.0 * strength.clamp(0.0, 1.0);
        match self.perf_mode {
            PerfMode::Quality => gaussian_blur_f32(frame, sigma),
            PerfMode::Performance => {
                let (w, h) = frame.dimensions();
                let small = imageops::resize(
                    frame,
                    (w / 2).max(1),
                    (h / 2).max(1),
                    FilterType::Triangle,
                );
                let small = gaussian_blur_f32(&small, (sigma / 2.0).max(0.5));
                imageops::resize(&small, w, h, FilterType::Triangle)
            }
        }
    }
}

/// Mean colour of the top, left and right border strips
fn border_mean(img: &RgbImage, border: u32) -> [f32; 3] {
    let (w, h) = img.dimensions();
    let bw = border.min(w / 2).max(1);
    let bh = border.min(h / 2).max(1);
    let mut sum = [0.0f64; 3];
    let mut n = 0u64;

    for (x, y, px) in img.enumerate_pixels() {
        if y < bh || x < bw || x >= w.saturating_sub(bw) {
            for c in 0..3 {
                sum[c] += px[c] as f64;
            }
            n += 1;
        }
    }

    if n == 0 {
        return [0.0; 3];
    }
    sum.map(|s| (s / n as f64) as f32)
}

impl EffectEngine for SoftwareEngine {
    type Buffers = SoftwareBuffers;

    fn init(model_dir: Option<&Path>, perf_mode: PerfMode) -> Result<Self, InitError> {
        let tuning = match model_dir {
            Some(dir) => MatteTuning::load(dir)?,
            None => MatteTuning::default(),
        };
        info!(?perf_mode, ?tuning, "Software effect engine ready");
        Ok(Self { perf_mode, tuning })
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<SoftwareBuffers, EffectError> {
        if width == 0 || height == 0 {
            return Err(EffectError::Allocation(format!(
                "invalid geometry {}x{}",
                width, height
            )));
        }
        let (mw, mh) = self.matte_size(width, height);
        debug!(width, height, matte_width = mw, matte_height = mh, "Allocating effect buffers");
        Ok(SoftwareBuffers {
            width,
            height,
            matte: Matte::new(mw, mh),
            primed: false,
        })
    }

    fn buffer_size(buffers: &SoftwareBuffers) -> (u32, u32) {
        (buffers.width, buffers.height)
    }

    fn process(
        &mut self,
        frame: &RgbImage,
        mode: EffectMode,
        params: &EffectParams<'_>,
        buffers: &mut SoftwareBuffers,
    ) -> Result<RgbImage, EffectError> {
        check_geometry(frame, (buffers.width, buffers.height))?;

        match mode {
            EffectMode::None => return Ok(frame.clone()),
            EffectMode::Denoise => {
                let radius = match self.perf_mode {
                    PerfMode::Quality => 2,
                    PerfMode::Performance => 1,
                };
                return Ok(median_filter(frame, radius, radius));
            }
            _ => {}
        }

        self.estimate_matte(frame, buffers);
        let matte = &buffers.matte;
        let (w, h) = frame.dimensions();

        let out = match mode {
            EffectMode::Matte => composite::matte_image(matte, w, h),
            EffectMode::Light => composite::light(frame, matte),
            EffectMode::Green => composite::over_color(frame, GREEN, matte),
            EffectMode::White => composite::over_color(frame, WHITE, matte),
            EffectMode::Background => match params.background {
                Some(bg) if bg.dimensions() == (w, h) => composite::over_image(frame, bg, matte),
                Some(bg) => {
                    let bg = imageops::resize(bg, w, h, FilterType::Triangle);
                    composite::over_image(frame, &bg, matte)
                }
                None => composite::over_color(frame, FALLBACK_BACKGROUND, matte),
            },
            EffectMode::Blur => {
                let bg = self.blurred(frame, params.blur_strength);
                composite::over_image(frame, &bg, matte)
            }
            EffectMode::None | EffectMode::Denoise => frame.clone(),
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Light grey scene with a red square in the middle
    fn scene(size: u32) -> RgbImage {
        let q = size / 4;
        RgbImage::from_fn(size, size, |x, y| {
            if (q..size - q).contains(&x) && (q..size - q).contains(&y) {
                Rgb([220, 20, 20])
            } else {
                Rgb([200, 200, 200])
            }
        })
    }

    #[test]
    fn test_green_replaces_border() {
        let mut engine = SoftwareEngine::init(None, PerfMode::Quality).unwrap();
        let mut buffers = engine.allocate(32, 32).unwrap();
        let out = engine
            .process(&scene(32), EffectMode::Green, &EffectParams::default(), &mut buffers)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [0, 255, 0]);
        assert_eq!(out.get_pixel(16, 16).0, [220, 20, 20]);
    }

    #[test]
    fn test_background_without_image_uses_fallback() {
        let mut engine = SoftwareEngine::init(None, PerfMode::Performance).unwrap();
        let mut buffers = engine.allocate(32, 32).unwrap();
        let out = engine
            .process(
                &scene(32),
                EffectMode::Background,
                &EffectParams::default(),
                &mut buffers,
            )
            .unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [0, 200, 0]);
    }

    #[test]
    fn test_geometry_mismatch() {
        let mut engine = SoftwareEngine::init(None, PerfMode::Quality).unwrap();
        let mut buffers = engine.allocate(16, 16).unwrap();
        let err = engine
            .process(&scene(32), EffectMode::Blur, &EffectParams::default(), &mut buffers)
            .unwrap_err();
        assert!(matches!(err, EffectError::GeometryMismatch { .. }));
    }

    #[test]
    fn test_performance_matte_is_half_size() {
        let mut engine = SoftwareEngine::init(None, PerfMode::Performance).unwrap();
        let buffers = engine.allocate(64, 48).unwrap();
        assert_eq!((buffers.matte().width, buffers.matte().height), (32, 24));
        assert_eq!(SoftwareEngine::buffer_size(&buffers), (64, 48));
    }

    #[test]
    fn test_missing_model_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SoftwareEngine::init(Some(&missing), PerfMode::Quality),
            Err(InitError::ModelDirectory(_))
        ));
    }

    #[test]
    fn test_tuning_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TUNING_FILE), r#"{"threshold": 0.2}"#).unwrap();
        let engine = SoftwareEngine::init(Some(dir.path()), PerfMode::Quality).unwrap();
        assert_eq!(engine.tuning().threshold, 0.2);
        assert_eq!(engine.tuning().border, 8);

        std::fs::write(dir.path().join(TUNING_FILE), "not json").unwrap();
        assert!(matches!(
            SoftwareEngine::init(Some(dir.path()), PerfMode::Quality),
            Err(InitError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_zero_allocation_rejected() {
        let mut engine = SoftwareEngine::init(None, PerfMode::Quality).unwrap();
        assert!(engine.allocate(0, 720).is_err());
    }
}
