//! Randomized candidate placement along guide paths.
//!
//! Three interchangeable strategies, selected per render job. Each mutates
//! the candidate's transform in place and reports the magnitudes it applied,
//! which end up in the frame sidecar for provenance.

use std::f32::consts::{FRAC_PI_4, PI, TAU};

use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::scene::{Guide, Transform};

/// Rotation bound for guides tagged `functional`. Functional spatial
/// relations are angle-sensitive, so the jitter stays within a quarter turn.
pub const FUNCTIONAL_ROTATION_BOUND: f32 = FRAC_PI_4;

/// Rotation bound for all other guides.
pub const FREE_ROTATION_BOUND: f32 = PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum PlacementMode {
    /// Snap to the guide midpoint; no randomization.
    #[value(name = "none")]
    #[serde(rename = "none")]
    Fixed,
    /// Random position along the guide plus a random rotation about the
    /// vertical axis.
    #[value(name = "jitter")]
    #[serde(rename = "jitter")]
    JitterPose,
    /// Guide midpoint displaced along the guide's perpendicular by a random
    /// scale factor.
    #[value(name = "offset")]
    #[serde(rename = "offset")]
    OffsetDistance,
}

/// Bound for the perpendicular displacement of `OffsetDistance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetBounds {
    pub min: f32,
    pub max: f32,
}

impl Default for OffsetBounds {
    fn default() -> Self {
        Self { min: -2.0, max: 0.0 }
    }
}

/// Magnitudes a placement strategy applied, recorded per referent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manipulations {
    /// Parameter t along the guide segment, when position was sampled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_t: Option<f32>,
    /// Rotation delta in radians added about the vertical axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
    /// Perpendicular displacement scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f32>,
}

/// Rotation bound applicable to a guide, by its type tag.
pub fn rotation_bound(guide: &Guide) -> f32 {
    if guide.kind.as_deref() == Some("functional") {
        FUNCTIONAL_ROTATION_BOUND
    } else {
        FREE_ROTATION_BOUND
    }
}

/// Place a candidate on a guide according to the chosen strategy.
///
/// Only the horizontal (x, y) position and the rotation about Z are touched;
/// height and the other Euler angles stay as authored.
pub fn place_candidate(
    transform: &mut Transform,
    guide: &Guide,
    mode: PlacementMode,
    bounds: OffsetBounds,
    rng: &mut impl Rng,
) -> Manipulations {
    match mode {
        PlacementMode::Fixed => {
            let p = guide.midpoint();
            transform.position.x = p.x;
            transform.position.y = p.y;
            Manipulations::default()
        }
        PlacementMode::JitterPose => {
            let t: f32 = rng.gen();
            let p = guide.point_at(t);
            transform.position.x = p.x;
            transform.position.y = p.y;

            let bound = rotation_bound(guide);
            let delta = rng.gen_range(-bound..=bound);
            transform.rotation.z = (transform.rotation.z + delta).rem_euclid(TAU);

            Manipulations {
                position_t: Some(t),
                rotation: Some(delta),
                offset: None,
            }
        }
        PlacementMode::OffsetDistance => {
            let scale = rng.gen_range(bounds.min..=bounds.max);
            let p = guide.midpoint() + guide.perpendicular() * scale;
            transform.position.x = p.x;
            transform.position.y = p.y;

            Manipulations {
                position_t: None,
                rotation: None,
                offset: Some(scale),
            }
        }
    }
}
