//! Camera model and view-frame computation.
//!
//! The camera matches the conventions of the upstream content tool: it looks
//! down its local -Z axis, Euler angles are applied in XYZ order, and the
//! visible frame at unit distance is described by four corner coordinates.
//! The frame is stored negated, which is the form the bounding-box projection
//! consumes (see `projection`).

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    #[default]
    Perspective,
    Orthographic,
}

fn default_fov() -> f32 {
    39.6
}

fn default_ortho_scale() -> f32 {
    6.0
}

/// Camera parameters, deserialized as part of the scene model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub position: [f32; 3],
    /// Euler angles (XYZ order) in radians.
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default)]
    pub projection: Projection,
    /// Horizontal field of view in degrees (perspective only).
    #[serde(default = "default_fov")]
    pub fov_deg: f32,
    /// Width of the visible extent in world units (orthographic only).
    #[serde(default = "default_ortho_scale")]
    pub ortho_scale: f32,
    /// Lens shift as a fraction of the larger frame dimension.
    #[serde(default)]
    pub shift: [f32; 2],
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 10.0],
            rotation: [0.0, 0.0, 0.0],
            projection: Projection::Perspective,
            fov_deg: default_fov(),
            ortho_scale: default_ortho_scale(),
            shift: [0.0, 0.0],
        }
    }
}

/// The camera's visible rectangle at unit distance, negated to match the
/// local-space convention of the projection formula. For perspective cameras
/// the rectangle scales linearly with depth; orthographic frames are
/// depth-independent.
#[derive(Debug, Clone, Copy)]
pub struct ViewFrame {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub perspective: bool,
}

impl ViewFrame {
    /// The frame slice at the given depth (perspective cameras only).
    pub fn at_depth(&self, depth: f32) -> ViewFrame {
        ViewFrame {
            min_x: self.min_x * depth,
            min_y: self.min_y * depth,
            max_x: self.max_x * depth,
            max_y: self.max_y * depth,
            perspective: self.perspective,
        }
    }
}

impl Camera {
    pub fn position_vec3(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    /// World-from-camera matrix.
    pub fn camera_to_world(&self) -> Mat4 {
        let rotation = Mat4::from_euler(
            glam::EulerRot::XYZ,
            self.rotation[0],
            self.rotation[1],
            self.rotation[2],
        );
        Mat4::from_translation(self.position_vec3()) * rotation
    }

    /// Camera-from-world matrix, the inverse world transform applied to
    /// every vertex before projection.
    pub fn world_to_camera(&self) -> Mat4 {
        self.camera_to_world().inverse()
    }

    pub fn is_perspective(&self) -> bool {
        self.projection == Projection::Perspective
    }

    /// Compute the negated view frame for a given render resolution.
    ///
    /// The half extents fit the frame to the larger image dimension, so the
    /// field of view (or orthographic scale) spans the major axis.
    pub fn view_frame(&self, width: u32, height: u32) -> ViewFrame {
        let aspect = width as f32 / height as f32;
        let half_major = match self.projection {
            Projection::Perspective => (self.fov_deg.to_radians() * 0.5).tan(),
            Projection::Orthographic => self.ortho_scale * 0.5,
        };
        let (half_x, half_y) = if aspect >= 1.0 {
            (half_major, half_major / aspect)
        } else {
            (half_major * aspect, half_major)
        };

        // Shift moves the frame center; negation flips its direction along
        // with the rest of the frame.
        let cx = -(self.shift[0] * 2.0 * half_major);
        let cy = -(self.shift[1] * 2.0 * half_major);

        ViewFrame {
            min_x: cx - half_x,
            min_y: cy - half_y,
            max_x: cx + half_x,
            max_y: cy + half_y,
            perspective: self.is_perspective(),
        }
    }
}
