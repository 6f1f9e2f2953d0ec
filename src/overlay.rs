//! Label and arrow compositing over rendered frames.
//!
//! Labels are drawn on a transparent layer (translucent rectangle plus an
//! uppercase letter centered on the referent's box) which is then
//! alpha-blended onto the base render. The arrow artifact marks the single
//! reference-frame-tagged referent, anchored at the top-right corner of its
//! box; it is only produced when exactly one such referent exists.

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_line_segment_mut, draw_polygon_mut, text_size,
};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::projection::PixelRect;
use crate::scene::ReferenceFrame;

/// Side length of the arrow glyph in pixels.
pub const ARROW_SIZE: f32 = 48.0;

/// Label for the i-th labeled referent: A..Z, then AA, AB... in the manner
/// of spreadsheet columns, so label keys never collide.
pub fn referent_label(i: usize) -> String {
    let mut n = i;
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (n % 26) as u8) as char);
        n /= 26;
        if n == 0 {
            break;
        }
        n -= 1;
    }
    letters.iter().rev().collect()
}

#[derive(Debug, Clone)]
pub struct LabelStyle {
    pub box_fill: Rgba<u8>,
    pub text_color: Rgba<u8>,
    pub text_scale: f32,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            box_fill: Rgba([255, 255, 255, 110]),
            text_color: Rgba([0, 0, 0, 255]),
            text_scale: 26.0,
        }
    }
}

fn clipped_rect(rect: &PixelRect) -> Rect {
    let x = rect.x0.round() as i32;
    let y = rect.y0.round() as i32;
    let w = (rect.width().round() as i64).max(1) as u32;
    let h = (rect.height().round() as i64).max(1) as u32;
    Rect::at(x, y).of_size(w, h)
}

/// Composite label overlays onto a copy of the base image.
///
/// When no font is available the rectangles are still drawn; letters are
/// skipped. Entries are (label, pixel rectangle) pairs.
pub fn composite_labels(
    base: &RgbaImage,
    entries: &[(String, PixelRect)],
    font: Option<&FontVec>,
    style: &LabelStyle,
) -> RgbaImage {
    let mut out = base.clone();
    let mut layer = RgbaImage::from_pixel(base.width(), base.height(), Rgba([0, 0, 0, 0]));

    for (label, rect) in entries {
        draw_filled_rect_mut(&mut layer, clipped_rect(rect), style.box_fill);

        if let Some(font) = font {
            let scale = PxScale::from(style.text_scale);
            let (tw, th) = text_size(scale, font, label);
            let (cx, cy) = rect.center();
            let x = (cx - tw as f32 * 0.5).round() as i32;
            let y = (cy - th as f32 * 0.5).round() as i32;
            imageproc::drawing::draw_text_mut(&mut layer, style.text_color, x, y, scale, font, label);
        }
    }

    image::imageops::overlay(&mut out, &layer, 0, 0);
    out
}

/// Decide which referent gets the arrow: the index of the single tagged one,
/// or `None` when zero or several referents carry a tag.
pub fn arrow_target<I>(tags: I) -> Option<usize>
where
    I: IntoIterator<Item = Option<ReferenceFrame>>,
{
    let mut found = None;
    for (i, tag) in tags.into_iter().enumerate() {
        if tag.is_some() {
            if found.is_some() {
                return None;
            }
            found = Some(i);
        }
    }
    found
}

/// Composite the directional arrow onto a copy of the base image, anchored
/// at the top-right corner of the given box and pointing into it.
pub fn composite_arrow(base: &RgbaImage, rect: &PixelRect, color: Rgba<u8>) -> RgbaImage {
    let mut out = base.clone();

    let tip_x = rect.x1;
    let tip_y = rect.y0;
    // Shaft runs in from the upper right at 45 degrees.
    let run = ARROW_SIZE * std::f32::consts::FRAC_1_SQRT_2;
    let tail_x = tip_x + run;
    let tail_y = tip_y - run;

    // Slightly offset parallel strokes give the shaft some weight.
    for d in [-1.0f32, 0.0, 1.0] {
        draw_line_segment_mut(
            &mut out,
            (tail_x + d, tail_y),
            (tip_x + d, tip_y),
            color,
        );
    }

    // Arrow head: triangle around the tip.
    let head = 12.0f32;
    let dir = (-std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2);
    let base_x = tip_x - dir.0 * head;
    let base_y = tip_y - dir.1 * head;
    let perp = (-dir.1, dir.0);
    let half = head * 0.5;
    let points = [
        Point::new(tip_x.round() as i32, tip_y.round() as i32),
        Point::new(
            (base_x + perp.0 * half).round() as i32,
            (base_y + perp.1 * half).round() as i32,
        ),
        Point::new(
            (base_x - perp.0 * half).round() as i32,
            (base_y - perp.1 * half).round() as i32,
        ),
    ];
    if points[0] != points[1] && points[0] != points[2] && points[1] != points[2] {
        draw_polygon_mut(&mut out, &points, color);
    }

    out
}
