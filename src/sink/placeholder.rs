// SPDX-License-Identifier: GPL-3.0-only

//! "Camera off" frame shown to sink readers while the relay is idle

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut,
    draw_line_segment_mut, draw_polygon_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;

const BACKGROUND: Rgb<u8> = Rgb([16, 16, 20]);
const ICON: Rgb<u8> = Rgb([150, 150, 158]);
const SLASH: Rgb<u8> = Rgb([200, 60, 60]);

/// Render a dark frame with a crossed-out camera icon in the middle
pub fn render(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    // Icon is sized from the shorter edge so it survives any aspect ratio
    let unit = (width.min(height) / 12).max(2) as i32;
    let (cx, cy) = (width as i32 / 2, height as i32 / 2);

    let body_w = unit * 4;
    let body_h = unit * 3;
    let body_x = cx - body_w / 2 - unit / 2;
    let body_y = cy - body_h / 2;
    draw_filled_rect_mut(
        &mut img,
        Rect::at(body_x, body_y).of_size(body_w as u32, body_h as u32),
        ICON,
    );

    // Lens
    let lens_center = (body_x + body_w / 2, cy);
    draw_filled_circle_mut(&mut img, lens_center, unit, BACKGROUND);
    draw_hollow_circle_mut(&mut img, lens_center, unit / 2, ICON);

    // Viewfinder wedge on the right side of the body
    let wedge_x = body_x + body_w;
    if unit >= 2 {
        draw_polygon_mut(
            &mut img,
            &[
                Point::new(wedge_x, cy - unit / 2),
                Point::new(wedge_x + unit, cy - unit),
                Point::new(wedge_x + unit, cy + unit),
                Point::new(wedge_x, cy + unit / 2),
            ],
            ICON,
        );
    }

    // Slash, a few pixels thick
    let reach = (unit * 3) as f32;
    let thickness = (unit / 6).max(1);
    for offset in -thickness..=thickness {
        let o = offset as f32;
        draw_line_segment_mut(
            &mut img,
            (cx as f32 - reach + o, cy as f32 - reach),
            (cx as f32 + reach + o, cy as f32 + reach),
            SLASH,
        );
    }

    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_geometry_and_content() {
        let img = render(1280, 720);
        assert_eq!(img.dimensions(), (1280, 720));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        assert!(img.pixels().any(|p| *p == SLASH));
    }

    #[test]
    fn test_render_tiny() {
        let img = render(8, 6);
        assert_eq!(img.dimensions(), (8, 6));
    }
}
