//! Typed scene description.
//!
//! Two layers of configuration feed the renderer:
//! - the experiment config (`SceneSpec`), naming the scene, its relation
//!   vocabulary, prompt templates and ground object;
//! - the scene model file it points at, describing the camera, the objects,
//!   which of them are referents/candidates, and the guide paths.
//!
//! Both are plain JSON. The model is validated once at load time so that the
//! rest of the pipeline works with indices into checked collections rather
//! than ad hoc lookups by name.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;

/// Experiment-level configuration, loaded from the scene config JSON.
///
/// Immutable after load; a copy is embedded verbatim in every frame sidecar
/// so the server can format prompts without re-reading the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSpec {
    pub scene_name: String,
    /// Path to the scene model file, relative to the config's directory.
    pub scene_file: PathBuf,
    /// Relation vocabulary ("in front of", "near", ...).
    pub relations: Vec<String>,
    /// Prompt templates by name, with `{relation}`/`{ground}` placeholders.
    pub prompts: BTreeMap<String, String>,
    /// Name of the ground object substituted into prompt templates.
    pub ground: String,
}

impl SceneSpec {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scene config {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scene config {:?}", path))
    }

    /// Resolve `scene_file` against the directory the config was loaded from.
    pub fn resolved_scene_file(&self, config_path: &Path) -> PathBuf {
        match config_path.parent() {
            Some(dir) => dir.join(&self.scene_file),
            None => self.scene_file.clone(),
        }
    }
}

/// Reference-frame kind a referent may be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceFrame {
    Intrinsic,
    Relative,
    Absolute,
}

/// Transform component for scene objects.
#[derive(Debug, Clone)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles (XYZ order) in radians. Placement rotates about Z,
    /// the vertical axis of the scene.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Local-to-world matrix.
    pub fn matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            glam::EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

/// One object in the scene. Geometry is either a loaded OBJ mesh or a unit
/// cube; both are stored as local-space vertex positions, which is all the
/// bounding-box projection needs.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    vertices: Vec<Vec3>,
}

impl SceneObject {
    /// Vertex positions transformed into world space.
    pub fn world_vertices(&self) -> Vec<Vec3> {
        let m = self.transform.matrix();
        self.vertices.iter().map(|&v| m.transform_point3(v)).collect()
    }
}

/// An object eligible for a bounding-box label.
#[derive(Debug, Clone)]
pub struct Referent {
    /// Display name (the object's name).
    pub name: String,
    /// Index of the referent's object in `SceneModel::objects`.
    pub object: usize,
    /// Optional child object whose geometry anchors the label instead of
    /// the referent's own.
    pub anchor: Option<usize>,
    pub reference_frame: Option<ReferenceFrame>,
}

/// A path segment parametrizing candidate placement.
#[derive(Debug, Clone)]
pub struct Guide {
    pub name: String,
    /// Type tag, taken from the name suffix after the last '.'.
    /// Names without a suffix get no tag.
    pub kind: Option<String>,
    pub start: Vec3,
    pub end: Vec3,
}

impl Guide {
    pub fn midpoint(&self) -> Vec3 {
        (self.start + self.end) * 0.5
    }

    /// Point at parameter t in [0, 1] along the segment.
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.start + (self.end - self.start) * t
    }

    /// Unit vector perpendicular to the segment in the horizontal plane.
    pub fn perpendicular(&self) -> Vec3 {
        let d = self.end - self.start;
        Vec3::new(-d.y, d.x, 0.0).normalize_or_zero()
    }

    /// Parse the type tag out of a guide name.
    pub fn kind_of(name: &str) -> Option<String> {
        name.rsplit_once('.').map(|(_, suffix)| suffix.to_string())
    }
}

// Raw document structs: what the scene model JSON actually contains.
// Converted to the validated runtime model by `SceneModel::load`.

fn default_visible() -> bool {
    true
}

fn default_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

#[derive(Debug, Deserialize)]
struct ObjectDoc {
    name: String,
    #[serde(default)]
    position: [f32; 3],
    #[serde(default)]
    rotation: [f32; 3],
    #[serde(default = "default_scale")]
    scale: [f32; 3],
    #[serde(default = "default_visible")]
    visible: bool,
    /// OBJ mesh path relative to the scene model file. Unit cube if absent.
    #[serde(default)]
    mesh: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ReferentDoc {
    object: String,
    #[serde(default)]
    anchor: Option<String>,
    #[serde(default)]
    reference_frame: Option<ReferenceFrame>,
}

#[derive(Debug, Deserialize)]
struct GuideDoc {
    name: String,
    start: [f32; 3],
    end: [f32; 3],
}

#[derive(Debug, Deserialize)]
struct ModelDoc {
    camera: Camera,
    objects: Vec<ObjectDoc>,
    referents: Vec<ReferentDoc>,
    #[serde(default)]
    candidates: Vec<String>,
    #[serde(default)]
    guides: Vec<GuideDoc>,
}

/// Validated scene model. All cross-references have been resolved to
/// indices; lookups past this point cannot fail.
#[derive(Debug, Clone)]
pub struct SceneModel {
    pub camera: Camera,
    pub objects: Vec<SceneObject>,
    /// Referents in declaration order; this order assigns labels A, B, C...
    pub referents: Vec<Referent>,
    /// Indices into `referents` of the dynamically placed candidates.
    pub candidates: Vec<usize>,
    pub guides: Vec<Guide>,
}

impl SceneModel {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scene model {:?}", path))?;
        let doc: ModelDoc = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scene model {:?}", path))?;
        Self::from_doc(doc, path.parent().unwrap_or(Path::new(".")))
    }

    fn from_doc(doc: ModelDoc, base_dir: &Path) -> Result<Self> {
        // A zero-width view frame would divide by zero in the projection.
        if !(doc.camera.fov_deg > 0.0 && doc.camera.fov_deg < 180.0) {
            bail!(
                "camera fov must be within (0, 180) degrees, got {}",
                doc.camera.fov_deg
            );
        }
        if !(doc.camera.ortho_scale > 0.0) {
            bail!(
                "camera ortho scale must be positive, got {}",
                doc.camera.ortho_scale
            );
        }

        let mut objects = Vec::with_capacity(doc.objects.len());
        let mut by_name = HashMap::new();
        for obj in doc.objects {
            if by_name.insert(obj.name.clone(), objects.len()).is_some() {
                bail!("duplicate object name {:?}", obj.name);
            }
            let vertices = match &obj.mesh {
                Some(mesh) => load_obj_vertices(&base_dir.join(mesh))?,
                None => unit_cube_vertices(),
            };
            objects.push(SceneObject {
                name: obj.name,
                transform: Transform {
                    position: Vec3::from_array(obj.position),
                    rotation: Vec3::from_array(obj.rotation),
                    scale: Vec3::from_array(obj.scale),
                },
                visible: obj.visible,
                vertices,
            });
        }

        let lookup = |name: &str| -> Result<usize> {
            by_name
                .get(name)
                .copied()
                .with_context(|| format!("scene model references unknown object {:?}", name))
        };

        let mut referents = Vec::with_capacity(doc.referents.len());
        let mut referent_by_name = HashMap::new();
        for r in doc.referents {
            let object = lookup(&r.object)?;
            let anchor = r.anchor.as_deref().map(&lookup).transpose()?;
            if referent_by_name.insert(r.object.clone(), referents.len()).is_some() {
                bail!("object {:?} declared as a referent twice", r.object);
            }
            referents.push(Referent {
                name: r.object,
                object,
                anchor,
                reference_frame: r.reference_frame,
            });
        }

        let mut candidates = Vec::with_capacity(doc.candidates.len());
        let mut seen = HashSet::new();
        for name in &doc.candidates {
            let idx = referent_by_name
                .get(name.as_str())
                .copied()
                .with_context(|| format!("candidate {:?} is not a declared referent", name))?;
            if !seen.insert(idx) {
                bail!("candidate {:?} listed twice", name);
            }
            candidates.push(idx);
        }

        let mut guides = Vec::with_capacity(doc.guides.len());
        for g in doc.guides {
            let start = Vec3::from_array(g.start);
            let end = Vec3::from_array(g.end);
            if start == end {
                bail!("guide {:?} has coincident endpoints", g.name);
            }
            let kind = Guide::kind_of(&g.name);
            guides.push(Guide {
                name: g.name,
                kind,
                start,
                end,
            });
        }

        Ok(Self {
            camera: doc.camera,
            objects,
            referents,
            candidates,
            guides,
        })
    }

    /// World-space geometry used for a referent's bounding box: the anchor
    /// object's if one was declared, the referent's own otherwise.
    pub fn referent_world_vertices(&self, referent: usize) -> Vec<Vec3> {
        let r = &self.referents[referent];
        let object = r.anchor.unwrap_or(r.object);
        self.objects[object].world_vertices()
    }

    /// Whether a referent is visible in the current setting.
    pub fn referent_visible(&self, referent: usize) -> bool {
        self.objects[self.referents[referent].object].visible
    }
}

/// Construct an object with unit-cube geometry, for tests elsewhere in the
/// crate that need a model without a scene file.
#[cfg(test)]
pub fn test_object(name: &str, transform: Transform, visible: bool) -> SceneObject {
    SceneObject {
        name: name.to_string(),
        transform,
        visible,
        vertices: unit_cube_vertices(),
    }
}

/// Corners of a unit cube centered at the origin.
fn unit_cube_vertices() -> Vec<Vec3> {
    let mut v = Vec::with_capacity(8);
    for &x in &[-0.5f32, 0.5] {
        for &y in &[-0.5f32, 0.5] {
            for &z in &[-0.5f32, 0.5] {
                v.push(Vec3::new(x, y, z));
            }
        }
    }
    v
}

/// Load vertex positions from an OBJ file. Faces and normals are irrelevant
/// here; the projection only needs the point cloud.
fn load_obj_vertices(path: &Path) -> Result<Vec<Vec3>> {
    let load_options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) = tobj::load_obj(path, &load_options)
        .with_context(|| format!("failed to load mesh {:?}", path))?;
    if models.is_empty() {
        bail!("mesh {:?} contains no models", path);
    }
    let mut vertices = Vec::new();
    for model in &models {
        for p in model.mesh.positions.chunks_exact(3) {
            vertices.push(Vec3::new(p[0], p[1], p[2]));
        }
    }
    if vertices.is_empty() {
        bail!("mesh {:?} contains no vertices", path);
    }
    Ok(vertices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Projection;

    fn model_doc(json: &str) -> Result<SceneModel> {
        let doc: ModelDoc = serde_json::from_str(json).unwrap();
        SceneModel::from_doc(doc, Path::new("."))
    }

    const BASE: &str = r#"{
        "camera": {"position": [0.0, 0.0, 10.0]},
        "objects": [
            {"name": "Man", "position": [1.0, 0.0, 0.0]},
            {"name": "Car", "position": [-1.0, 0.0, 0.0]}
        ],
        "referents": [
            {"object": "Man", "reference_frame": "intrinsic"},
            {"object": "Car"}
        ],
        "candidates": ["Man"],
        "guides": [
            {"name": "Path.functional", "start": [0.0, 0.0, 0.0], "end": [2.0, 0.0, 0.0]}
        ]
    }"#;

    #[test]
    fn test_load_valid_model() {
        let model = model_doc(BASE).unwrap();
        assert_eq!(model.objects.len(), 2);
        assert_eq!(model.referents.len(), 2);
        assert_eq!(model.candidates, vec![0]);
        assert_eq!(model.guides[0].kind.as_deref(), Some("functional"));
        assert_eq!(model.camera.projection, Projection::Perspective);
        assert_eq!(
            model.referents[0].reference_frame,
            Some(ReferenceFrame::Intrinsic)
        );
    }

    #[test]
    fn test_unknown_candidate_rejected() {
        let json = BASE.replace("\"candidates\": [\"Man\"]", "\"candidates\": [\"Dog\"]");
        assert!(model_doc(&json).is_err());
    }

    #[test]
    fn test_unknown_referent_object_rejected() {
        let json = BASE.replace("{\"object\": \"Car\"}", "{\"object\": \"Bus\"}");
        assert!(model_doc(&json).is_err());
    }

    #[test]
    fn test_degenerate_guide_rejected() {
        let json = BASE.replace("\"end\": [2.0, 0.0, 0.0]", "\"end\": [0.0, 0.0, 0.0]");
        assert!(model_doc(&json).is_err());
    }

    #[test]
    fn test_zero_fov_rejected() {
        // Unchecked, a zero field of view collapses the view frame and the
        // projected boxes come out with min > max.
        let json = BASE.replace(
            "\"camera\": {\"position\": [0.0, 0.0, 10.0]}",
            "\"camera\": {\"position\": [0.0, 0.0, 10.0], \"fov_deg\": 0.0}",
        );
        assert!(model_doc(&json).is_err());
    }

    #[test]
    fn test_out_of_range_fov_rejected() {
        let json = BASE.replace(
            "\"camera\": {\"position\": [0.0, 0.0, 10.0]}",
            "\"camera\": {\"position\": [0.0, 0.0, 10.0], \"fov_deg\": 180.0}",
        );
        assert!(model_doc(&json).is_err());
    }

    #[test]
    fn test_zero_ortho_scale_rejected() {
        let json = BASE.replace(
            "\"camera\": {\"position\": [0.0, 0.0, 10.0]}",
            "\"camera\": {\"position\": [0.0, 0.0, 10.0], \"projection\": \"orthographic\", \"ortho_scale\": 0.0}",
        );
        assert!(model_doc(&json).is_err());
    }

    #[test]
    fn test_guide_kind_parsing() {
        assert_eq!(Guide::kind_of("Path.functional").as_deref(), Some("functional"));
        assert_eq!(Guide::kind_of("Road.side.free").as_deref(), Some("free"));
        assert_eq!(Guide::kind_of("Path"), None);
    }

    #[test]
    fn test_unit_cube_world_vertices() {
        let model = model_doc(BASE).unwrap();
        let verts = model.objects[0].world_vertices();
        assert_eq!(verts.len(), 8);
        // Object sits at x = 1 with unit scale.
        let max_x = verts.iter().map(|v| v.x).fold(f32::MIN, f32::max);
        assert!((max_x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_scene_spec_roundtrip() {
        let spec = SceneSpec {
            scene_name: "mancar".into(),
            scene_file: "mancar.model.json".into(),
            relations: vec!["in front of".into(), "near".into()],
            prompts: [("confirm".to_string(), "Is A {relation} the {ground}?".to_string())]
                .into_iter()
                .collect(),
            ground: "car".into(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: SceneSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
