// SPDX-License-Identifier: GPL-3.0-only
//! Frame type and pixel format conversion
//!
//! Frames travel through the relay as packed RGB24. Capture converts into it,
//! the virtual sink converts out of it into planar I420.

use image::{ImageFormat, RgbImage};
use std::time::Instant;

/// A single video frame in packed RGB24
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    /// When the frame left the capture device
    pub captured_at: Instant,
}

impl VideoFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }
}

/// Convert YUYV (YUV 4:2:2) to RGB24
///
/// YUYV format: Y0 U0 Y1 V0 - each 4-byte group encodes 2 pixels.
/// Uses BT.601 coefficients. Returns `None` when the buffer is too short.
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let pixel_count = (width as usize) * (height as usize);
    if width == 0 || height == 0 || data.len() < pixel_count * 2 {
        return None;
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for chunk in data.chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        for y in [y0, y1] {
            if rgb.len() >= pixel_count * 3 {
                break;
            }
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    RgbImage::from_raw(width, height, rgb)
}

/// Wrap packed RGB24 bytes, dropping any trailing padding
pub fn rgb3_to_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let len = (width as usize) * (height as usize) * 3;
    if width == 0 || height == 0 || data.len() < len {
        return None;
    }
    RgbImage::from_raw(width, height, data[..len].to_vec())
}

/// Decode a single MJPG frame
pub fn mjpeg_to_rgb(data: &[u8]) -> Option<RgbImage> {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .ok()
        .map(|img| img.to_rgb8())
}

/// Size in bytes of an I420 frame, chroma planes rounded up for odd sizes
pub fn i420_frame_size(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
}

/// Convert an RGB frame to planar I420 (YU12): full Y plane, then U, then V
///
/// Chroma is averaged over each 2x2 block (BT.601, full range).
pub fn rgb_to_i420(image: &RgbImage) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut out = vec![0u8; i420_frame_size(width, height)];
    let (y_plane, chroma) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);
    let raw = image.as_raw();

    for (row, y_row) in y_plane.chunks_exact_mut(w.max(1)).enumerate().take(h) {
        let src = &raw[row * w * 3..(row + 1) * w * 3];
        for (dst, px) in y_row.iter_mut().zip(src.chunks_exact(3)) {
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            *dst = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
        }
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for y in (cy * 2)..((cy * 2 + 2).min(h)) {
                for x in (cx * 2)..((cx * 2 + 2).min(w)) {
                    let i = (y * w + x) * 3;
                    r += raw[i] as f32;
                    g += raw[i + 1] as f32;
                    b += raw[i + 2] as f32;
                    n += 1.0;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            let u = -0.169 * r - 0.331 * g + 0.5 * b + 128.0;
            let v = 0.5 * r - 0.419 * g - 0.081 * b + 128.0;
            u_plane[cy * cw + cx] = u.clamp(0.0, 255.0) as u8;
            v_plane[cy * cw + cx] = v.clamp(0.0, 255.0) as u8;
        }
    }

    out
}
