// SPDX-License-Identifier: GPL-3.0-only

//! Status strip drawn on the preview copy of a frame
//!
//! Never applied to frames going to the virtual camera.

use crate::state::EffectMode;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::time::Instant;

/// Frame rate at which the bar is full
const FULL_SCALE_FPS: f32 = 60.0;
/// Weight of a new sample in the smoothed frame period
const SMOOTHING: f32 = 1.0 / 16.0;

fn mode_color(mode: EffectMode) -> Rgb<u8> {
    match mode {
        EffectMode::Matte => Rgb([160, 160, 160]),
        EffectMode::Light => Rgb([250, 220, 120]),
        EffectMode::Green => Rgb([0, 220, 0]),
        EffectMode::White => Rgb([255, 255, 255]),
        EffectMode::None => Rgb([60, 60, 60]),
        EffectMode::Background => Rgb([60, 140, 230]),
        EffectMode::Blur => Rgb([150, 90, 220]),
        EffectMode::Denoise => Rgb([230, 120, 40]),
    }
}

/// Frame-rate tracker and strip renderer
#[derive(Debug, Default)]
pub struct Overlay {
    last_frame: Option<Instant>,
    period: Option<f32>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the timestamp of a relayed frame
    pub fn record_frame(&mut self, at: Instant) {
        if let Some(last) = self.last_frame {
            let dt = at.saturating_duration_since(last).as_secs_f32();
            if dt > 0.0 {
                self.period = Some(match self.period {
                    Some(p) => p + (dt - p) * SMOOTHING,
                    None => dt,
                });
            }
        }
        self.last_frame = Some(at);
    }

    /// Smoothed frames per second
    pub fn fps(&self) -> Option<f32> {
        self.period.filter(|p| *p > 0.0).map(|p| 1.0 / p)
    }

    /// Forget timing history (after the relay went idle)
    pub fn reset(&mut self) {
        self.last_frame = None;
        self.period = None;
    }

    /// Draw the strip into the top-left corner
    pub fn draw(&self, img: &mut RgbImage, mode: EffectMode, vcam_live: bool) {
        let (w, h) = img.dimensions();
        let unit = (h / 30).max(4) as i32;
        if (unit * 12) as u32 > w || (unit * 2) as u32 > h {
            return;
        }
        let margin = unit / 2;

        draw_filled_rect_mut(
            img,
            Rect::at(margin, margin).of_size(unit as u32, unit as u32),
            mode_color(mode),
        );

        let bar_x = margin * 2 + unit;
        let bar_w = unit * 8;
        let frame = Rect::at(bar_x, margin).of_size(bar_w as u32, unit as u32);
        draw_hollow_rect_mut(img, frame, Rgb([220, 220, 220]));
        let fill = self
            .fps()
            .map(|fps| ((fps / FULL_SCALE_FPS).clamp(0.0, 1.0) * (bar_w - 2) as f32) as u32)
            .unwrap_or(0);
        if fill > 0 && unit > 2 {
            draw_filled_rect_mut(
                img,
                Rect::at(bar_x + 1, margin + 1).of_size(fill, (unit - 2) as u32),
                Rgb([80, 200, 255]),
            );
        }

        let indicator = if vcam_live {
            Rgb([0, 230, 60])
        } else {
            Rgb([90, 90, 90])
        };
        draw_filled_circle_mut(
            img,
            (bar_x + bar_w + margin + unit / 2, margin + unit / 2),
            unit / 2,
            indicator,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fps_smoothing() {
        let mut overlay = Overlay::new();
        let t0 = Instant::now();
        assert_eq!(overlay.fps(), None);
        overlay.record_frame(t0);
        overlay.record_frame(t0 + Duration::from_millis(40));
        let fps = overlay.fps().unwrap();
        assert!((fps - 25.0).abs() < 0.01);

        // One slow frame only nudges the average
        overlay.record_frame(t0 + Duration::from_millis(240));
        let fps = overlay.fps().unwrap();
        assert!(fps > 15.0 && fps < 25.0);
    }

    #[test]
    fn test_draw_marks_corner() {
        let mut img = RgbImage::new(640, 480);
        Overlay::new().draw(&mut img, EffectMode::Green, true);
        let unit = 480 / 30;
        assert_eq!(*img.get_pixel(unit as u32 / 2 + 1, unit as u32 / 2 + 1), Rgb([0, 220, 0]));
    }

    #[test]
    fn test_draw_skips_tiny_frames() {
        let mut img = RgbImage::new(16, 16);
        Overlay::new().draw(&mut img, EffectMode::Blur, false);
        assert!(img.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
