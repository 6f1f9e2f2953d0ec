//! Bounding-box projection from world space into normalized image space.
//!
//! The algorithm follows the classic view-frame formulation: every vertex is
//! taken into camera-local space, the visible frame at the vertex's depth is
//! computed (for perspective cameras by scaling the unit-distance frame), and
//! the vertex's (x, y) is linearly interpolated between the frame corners.
//! The box is the clamped min/max of all interpolated coordinates.
//!
//! Vertices behind the camera still contribute by default, which can drag the
//! box toward degenerate values; excluding them changes stimulus framing, so
//! it is a policy choice (`BehindCamera`) rather than a fix.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;

/// Axis-aligned rectangle in normalized camera-projected image coordinates.
/// Each coordinate is clamped to [0, 1]; min <= max holds on both axes.
/// Normalized y increases upward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Box {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Box {
    pub const EMPTY: Box = Box {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 0.0,
        max_y: 0.0,
    };

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.min_x + self.width() * 0.5,
            self.min_y + self.height() * 0.5,
        )
    }

    /// Convert to a pixel-space rectangle. Raster y increases downward, so
    /// the y axis is flipped.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> PixelRect {
        let w = width as f32;
        let h = height as f32;
        PixelRect {
            x0: self.min_x * w,
            y0: (1.0 - self.max_y) * h,
            x1: self.max_x * w,
            y1: (1.0 - self.min_y) * h,
        }
    }
}

/// Rectangle in raster coordinates; (x0, y0) is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PixelRect {
    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

/// Policy for vertices with negative camera-local depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BehindCamera {
    /// Vertices behind the camera contribute to the interpolation.
    #[default]
    Keep,
    /// Vertices behind the camera are dropped before interpolation.
    Skip,
}

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Project world-space vertices through the camera and return the tightest
/// normalized box enclosing them, clamped to the visible frame.
///
/// Returns `Box::EMPTY` when no vertex contributes (empty input, or all
/// vertices skipped by the `BehindCamera::Skip` policy).
pub fn camera_view_bounds(
    camera: &Camera,
    vertices: &[Vec3],
    width: u32,
    height: u32,
    behind: BehindCamera,
) -> Box {
    let world_to_camera = camera.world_to_camera();
    let frame = camera.view_frame(width, height);

    let mut xs = Vec::with_capacity(vertices.len());
    let mut ys = Vec::with_capacity(vertices.len());

    for &v in vertices {
        let p = world_to_camera.transform_point3(v);
        let depth = -p.z;

        let slice = if frame.perspective {
            if depth == 0.0 {
                // On the camera plane: maps to the frame center.
                xs.push(0.5);
                ys.push(0.5);
                continue;
            }
            if behind == BehindCamera::Skip && depth < 0.0 {
                continue;
            }
            frame.at_depth(depth)
        } else {
            if behind == BehindCamera::Skip && depth < 0.0 {
                continue;
            }
            frame
        };

        xs.push((p.x - slice.min_x) / (slice.max_x - slice.min_x));
        ys.push((p.y - slice.min_y) / (slice.max_y - slice.min_y));
    }

    if xs.is_empty() {
        return Box::EMPTY;
    }

    let min = |vals: &[f32]| vals.iter().copied().fold(f32::INFINITY, f32::min);
    let max = |vals: &[f32]| vals.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    Box {
        min_x: clamp01(min(&xs)),
        min_y: clamp01(min(&ys)),
        max_x: clamp01(max(&xs)),
        max_y: clamp01(max(&ys)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Projection;

    fn camera_at_origin() -> Camera {
        // Default rotation looks down -Z.
        Camera {
            position: [0.0, 0.0, 0.0],
            ..Camera::default()
        }
    }

    fn cube_at(center: Vec3, half: f32) -> Vec<Vec3> {
        let mut v = Vec::new();
        for &x in &[-half, half] {
            for &y in &[-half, half] {
                for &z in &[-half, half] {
                    v.push(center + Vec3::new(x, y, z));
                }
            }
        }
        v
    }

    fn assert_valid(b: &Box) {
        assert!(0.0 <= b.min_x && b.min_x <= b.max_x && b.max_x <= 1.0, "{:?}", b);
        assert!(0.0 <= b.min_y && b.min_y <= b.max_y && b.max_y <= 1.0, "{:?}", b);
    }

    #[test]
    fn test_centered_cube_box_is_centered() {
        let cam = camera_at_origin();
        let b = camera_view_bounds(
            &cam,
            &cube_at(Vec3::new(0.0, 0.0, -8.0), 0.5),
            600,
            600,
            BehindCamera::Keep,
        );
        assert_valid(&b);
        let (cx, cy) = b.center();
        assert!((cx - 0.5).abs() < 1e-4);
        assert!((cy - 0.5).abs() < 1e-4);
        assert!(b.width() > 0.0 && b.width() < 0.5);
    }

    #[test]
    fn test_box_invariant_holds_for_offset_cube() {
        let cam = camera_at_origin();
        let b = camera_view_bounds(
            &cam,
            &cube_at(Vec3::new(2.0, 1.0, -6.0), 0.5),
            800,
            600,
            BehindCamera::Keep,
        );
        assert_valid(&b);
        // Object is up and to the right of center.
        assert!(b.min_x > 0.5);
        assert!(b.min_y > 0.5);
    }

    #[test]
    fn test_vertex_on_camera_plane_maps_to_center() {
        let cam = camera_at_origin();
        // Lateral coordinates are irrelevant at zero depth.
        let b = camera_view_bounds(
            &cam,
            &[Vec3::new(37.0, -12.0, 0.0)],
            600,
            600,
            BehindCamera::Keep,
        );
        assert_eq!(
            b,
            Box {
                min_x: 0.5,
                min_y: 0.5,
                max_x: 0.5,
                max_y: 0.5
            }
        );
    }

    #[test]
    fn test_behind_camera_vertex_still_clamped() {
        let cam = camera_at_origin();
        let mut verts = cube_at(Vec3::new(0.0, 0.0, -5.0), 0.5);
        verts.push(Vec3::new(0.3, 0.3, 2.0)); // behind the camera
        let b = camera_view_bounds(&cam, &verts, 600, 600, BehindCamera::Keep);
        assert_valid(&b);
    }

    #[test]
    fn test_behind_camera_skip_policy() {
        let cam = camera_at_origin();
        let front = cube_at(Vec3::new(0.0, 0.0, -5.0), 0.5);
        let mut with_stray = front.clone();
        with_stray.push(Vec3::new(50.0, 50.0, 2.0));
        let skipped = camera_view_bounds(&cam, &with_stray, 600, 600, BehindCamera::Skip);
        let clean = camera_view_bounds(&cam, &front, 600, 600, BehindCamera::Keep);
        assert_eq!(skipped, clean);
    }

    #[test]
    fn test_all_skipped_yields_empty() {
        let cam = camera_at_origin();
        let b = camera_view_bounds(
            &cam,
            &[Vec3::new(0.0, 0.0, 3.0)],
            600,
            600,
            BehindCamera::Skip,
        );
        assert_eq!(b, Box::EMPTY);
    }

    #[test]
    fn test_orthographic_box_independent_of_depth() {
        let cam = Camera {
            position: [0.0, 0.0, 0.0],
            projection: Projection::Orthographic,
            ortho_scale: 8.0,
            ..Camera::default()
        };
        let near = camera_view_bounds(
            &cam,
            &cube_at(Vec3::new(1.0, 0.0, -2.0), 0.5),
            600,
            600,
            BehindCamera::Keep,
        );
        let far = camera_view_bounds(
            &cam,
            &cube_at(Vec3::new(1.0, 0.0, -20.0), 0.5),
            600,
            600,
            BehindCamera::Keep,
        );
        assert_eq!(near, far);
        assert_valid(&near);
    }

    #[test]
    fn test_pixel_rect_flips_y() {
        let b = Box {
            min_x: 0.25,
            min_y: 0.5,
            max_x: 0.75,
            max_y: 1.0,
        };
        let r = b.to_pixel_rect(400, 200);
        assert_eq!(r.x0, 100.0);
        assert_eq!(r.x1, 300.0);
        // Top of the normalized box is the top of the raster rect.
        assert_eq!(r.y0, 0.0);
        assert_eq!(r.y1, 100.0);
        assert!(r.y0 <= r.y1);
    }

    #[test]
    fn test_empty_input_yields_empty_box() {
        let cam = camera_at_origin();
        assert_eq!(
            camera_view_bounds(&cam, &[], 600, 600, BehindCamera::Keep),
            Box::EMPTY
        );
    }
}
