// SPDX-License-Identifier: GPL-3.0-only

//! Alpha matte and compositing primitives

use image::{Rgb, RgbImage};

/// Foreground probability per pixel, possibly at a lower resolution than the frame
#[derive(Debug, Clone, PartialEq)]
pub struct Matte {
    pub width: u32,
    pub height: u32,
    pub alpha: Vec<f32>,
}

impl Matte {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            alpha: vec![0.0; (width as usize) * (height as usize)],
        }
    }

    /// Alpha for frame pixel (`x`, `y`) of a `frame_w`x`frame_h` frame
    #[inline]
    pub fn sample(&self, x: u32, y: u32, frame_w: u32, frame_h: u32) -> f32 {
        if self.width == frame_w && self.height == frame_h {
            return self.alpha[(y * self.width + x) as usize];
        }
        let mx = (x as u64 * self.width as u64 / frame_w.max(1) as u64) as u32;
        let my = (y as u64 * self.height as u64 / frame_h.max(1) as u64) as u32;
        let mx = mx.min(self.width.saturating_sub(1));
        let my = my.min(self.height.saturating_sub(1));
        self.alpha[(my * self.width + mx) as usize]
    }
}

#[inline]
fn mix(fg: u8, bg: u8, a: f32) -> u8 {
    (fg as f32 * a + bg as f32 * (1.0 - a)).round().clamp(0.0, 255.0) as u8
}

/// Grey rendering of the matte at frame size
pub fn matte_image(matte: &Matte, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = (matte.sample(x, y, width, height) * 255.0).round() as u8;
        Rgb([v, v, v])
    })
}

/// Foreground over a same-sized background image
pub fn over_image(fg: &RgbImage, bg: &RgbImage, matte: &Matte) -> RgbImage {
    let (w, h) = fg.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let a = matte.sample(x, y, w, h);
        let f = fg.get_pixel(x, y).0;
        let b = bg.get_pixel(x, y).0;
        Rgb([mix(f[0], b[0], a), mix(f[1], b[1], a), mix(f[2], b[2], a)])
    })
}

/// Foreground over a constant colour
pub fn over_color(fg: &RgbImage, color: Rgb<u8>, matte: &Matte) -> RgbImage {
    let (w, h) = fg.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let a = matte.sample(x, y, w, h);
        let f = fg.get_pixel(x, y).0;
        let b = color.0;
        Rgb([mix(f[0], b[0], a), mix(f[1], b[1], a), mix(f[2], b[2], a)])
    })
}

/// Background dimmed to half brightness, subject untouched
pub fn light(fg: &RgbImage, matte: &Matte) -> RgbImage {
    let (w, h) = fg.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let gain = 0.5 + 0.5 * matte.sample(x, y, w, h);
        let f = fg.get_pixel(x, y).0;
        Rgb(f.map(|c| (c as f32 * gain).round().clamp(0.0, 255.0) as u8))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_matte() -> Matte {
        // Left column background, right column subject
        Matte {
            width: 2,
            height: 1,
            alpha: vec![0.0, 1.0],
        }
    }

    #[test]
    fn test_over_color() {
        let fg = RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]));
        let out = over_color(&fg, Rgb([0, 255, 0]), &half_matte());
        assert_eq!(out.get_pixel(0, 0).0, [0, 255, 0]);
        assert_eq!(out.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_light() {
        let fg = RgbImage::from_pixel(2, 1, Rgb([200, 100, 50]));
        let out = light(&fg, &half_matte());
        assert_eq!(out.get_pixel(0, 0).0, [100, 50, 25]);
        assert_eq!(out.get_pixel(1, 0).0, [200, 100, 50]);
    }

    #[test]
    fn test_low_res_matte_sampling() {
        let matte = half_matte();
        // 4 wide frame: x 0,1 map to matte column 0, x 2,3 to column 1
        assert_eq!(matte.sample(1, 0, 4, 2), 0.0);
        assert_eq!(matte.sample(2, 1, 4, 2), 1.0);
        let grey = matte_image(&matte, 4, 2);
        assert_eq!(grey.get_pixel(3, 1).0, [255, 255, 255]);
    }
}
