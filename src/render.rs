//! The render pipeline: one imperative pass from scene config to artifacts.
//!
//! For every enumerated setting the pipeline hides unselected candidates,
//! places the selected ones on their guides, renders the scene through the
//! backend, projects referent bounding boxes, composites the label and arrow
//! overlays, and writes the image/JSON artifacts. A run-level metadata file
//! records provenance at the end.
//!
//! Rendering is synchronous and single-threaded; file writes are not
//! transactional. A crash mid-run can leave an image without its sidecar,
//! which is acceptable for an offline batch that is simply re-run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ab_glyph::FontVec;
use chrono::{DateTime, Utc};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::corpus::{FrameRecord, ReferentRecord};
use crate::overlay::{self, LabelStyle};
use crate::placement::{place_candidate, Manipulations, OffsetBounds, PlacementMode};
use crate::projection::{camera_view_bounds, BehindCamera, Box};
use crate::scene::{SceneModel, SceneSpec};
use crate::settings::{enumerate_settings, Setting};

/// Font files probed when the job does not name one.
const FONT_SEARCH_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
];

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_samples() -> usize {
    1
}

/// Specification for one render batch. Contains everything needed to
/// reproduce the batch deterministically (given a seed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    /// Path to the scene config JSON.
    pub scene_config: PathBuf,

    /// Output directory for frames and sidecars.
    pub output_dir: PathBuf,

    /// Repeated random draws per enumerated configuration.
    #[serde(default = "default_samples")]
    pub samples: usize,

    /// Placement randomization strategy.
    pub mode: PlacementMode,

    /// Cap on candidate subset size. None means no cap.
    #[serde(default)]
    pub max_candidates: Option<usize>,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// RNG seed. None draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Label font. None probes common system locations; when nothing is
    /// found, labels are drawn without letters and a warning is recorded.
    #[serde(default)]
    pub font: Option<PathBuf>,

    /// Bound for the `offset` placement mode.
    #[serde(default)]
    pub offset_bounds: OffsetBounds,

    /// Drop vertices behind the camera from bounding boxes.
    #[serde(default)]
    pub exclude_behind: bool,
}

impl RenderJob {
    pub fn new(scene_config: PathBuf, output_dir: PathBuf, mode: PlacementMode) -> Self {
        Self {
            scene_config,
            output_dir,
            samples: default_samples(),
            mode,
            max_candidates: None,
            width: default_width(),
            height: default_height(),
            seed: None,
            font: None,
            offset_bounds: OffsetBounds::default(),
            exclude_behind: false,
        }
    }

    /// Validate the job specification.
    pub fn validate(&self) -> Result<(), String> {
        if !self.scene_config.exists() {
            return Err(format!("Scene config not found: {:?}", self.scene_config));
        }
        if self.samples == 0 {
            return Err("Samples per setting must be positive".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err("Width and height must be positive".to_string());
        }
        if let Some(font) = &self.font {
            if !font.exists() {
                return Err(format!("Font file not found: {:?}", font));
            }
        }
        if self.offset_bounds.min > self.offset_bounds.max {
            return Err("Offset bounds must satisfy min <= max".to_string());
        }
        Ok(())
    }

    pub fn behind_policy(&self) -> BehindCamera {
        if self.exclude_behind {
            BehindCamera::Skip
        } else {
            BehindCamera::Keep
        }
    }
}

/// Render phase for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Initialization,
    ConfigLoad,
    SceneLoad,
    FontLoad,
    FrameRender,
    FrameSave,
    SidecarWrite,
    MetadataWrite,
}

impl std::fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderPhase::Initialization => write!(f, "Initialization"),
            RenderPhase::ConfigLoad => write!(f, "Config Load"),
            RenderPhase::SceneLoad => write!(f, "Scene Load"),
            RenderPhase::FontLoad => write!(f, "Font Load"),
            RenderPhase::FrameRender => write!(f, "Frame Render"),
            RenderPhase::FrameSave => write!(f, "Frame Save"),
            RenderPhase::SidecarWrite => write!(f, "Sidecar Write"),
            RenderPhase::MetadataWrite => write!(f, "Metadata Write"),
        }
    }
}

/// Structured error for render failures.
#[derive(Debug)]
pub struct RenderError {
    pub phase: RenderPhase,
    pub message: String,
    pub source: Option<std::boxed::Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl RenderError {
    pub fn new(phase: RenderPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        phase: RenderPhase,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            phase,
            message: message.into(),
            source: Some(std::boxed::Box::new(source)),
        }
    }
}

/// Render-and-read-back seam. The real renderer is an external collaborator;
/// the built-in backend paints projected silhouettes, which is enough for
/// producing complete artifact sets without a 3D engine.
pub trait RenderBackend {
    fn render(&self, model: &SceneModel, width: u32, height: u32)
        -> Result<RgbaImage, RenderError>;
}

/// Software backend: each visible object's projected extent is filled with a
/// color derived from its name, over a flat background.
#[derive(Debug, Clone)]
pub struct SilhouetteRenderer {
    pub background: Rgba<u8>,
    pub behind: BehindCamera,
}

impl Default for SilhouetteRenderer {
    fn default() -> Self {
        Self {
            background: Rgba([222, 222, 222, 255]),
            behind: BehindCamera::Keep,
        }
    }
}

impl SilhouetteRenderer {
    fn color_for(name: &str) -> Rgba<u8> {
        const PALETTE: &[[u8; 3]] = &[
            [66, 135, 245],
            [214, 69, 65],
            [77, 175, 124],
            [240, 180, 41],
            [142, 68, 173],
            [52, 152, 160],
        ];
        let sum: usize = name.bytes().map(|b| b as usize).sum();
        let c = PALETTE[sum % PALETTE.len()];
        Rgba([c[0], c[1], c[2], 255])
    }
}

impl RenderBackend for SilhouetteRenderer {
    fn render(
        &self,
        model: &SceneModel,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, RenderError> {
        let mut img = RgbaImage::from_pixel(width, height, self.background);
        for obj in &model.objects {
            if !obj.visible {
                continue;
            }
            let bounds =
                camera_view_bounds(&model.camera, &obj.world_vertices(), width, height, self.behind);
            if bounds == Box::EMPTY {
                continue;
            }
            let rect = bounds.to_pixel_rect(width, height);
            let w = (rect.width().round() as i64).max(1) as u32;
            let h = (rect.height().round() as i64).max(1) as u32;
            draw_filled_rect_mut(
                &mut img,
                Rect::at(rect.x0.round() as i32, rect.y0.round() as i32).of_size(w, h),
                Self::color_for(&obj.name),
            );
        }
        Ok(img)
    }
}

/// Metadata for a completed render run, written as metadata.json alongside
/// the frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub job: RenderJob,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub render_duration_secs: f64,
    pub frame_count: usize,
    /// SHA-256 of the scene model file.
    pub scene_file_hash: String,
    pub scenestim_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Compute the SHA-256 hash of a file's content.
pub fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn resolve_font(job: &RenderJob, warnings: &mut Vec<String>) -> Result<Option<FontVec>, RenderError> {
    let load = |path: &Path| -> Result<FontVec, RenderError> {
        let data = std::fs::read(path).map_err(|e| {
            RenderError::with_source(RenderPhase::FontLoad, format!("cannot read {:?}", path), e)
        })?;
        FontVec::try_from_vec(data).map_err(|e| {
            RenderError::with_source(RenderPhase::FontLoad, format!("invalid font {:?}", path), e)
        })
    };

    if let Some(path) = &job.font {
        return load(path).map(Some);
    }
    for candidate in FONT_SEARCH_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            if let Ok(font) = load(path) {
                log::debug!("using label font {:?}", path);
                return Ok(Some(font));
            }
        }
    }
    warnings.push("no label font found; labels drawn without letters".to_string());
    log::warn!("no label font found; labels drawn without letters");
    Ok(None)
}

/// Apply one setting to the model: hide unselected candidates, place the
/// selected ones. Returns applied manipulations keyed by referent index.
fn apply_setting(
    model: &mut SceneModel,
    setting: &Setting,
    mode: PlacementMode,
    bounds: OffsetBounds,
    rng: &mut StdRng,
) -> HashMap<usize, Manipulations> {
    let selected: Vec<usize> = setting.selected().collect();

    for (c, &referent) in model.candidates.clone().iter().enumerate() {
        let object = model.referents[referent].object;
        model.objects[object].visible = selected.contains(&c);
    }

    let mut applied = HashMap::new();
    for &(candidate, guide) in &setting.assignment {
        let referent = model.candidates[candidate];
        let object = model.referents[referent].object;
        let guide = model.guides[guide].clone();
        let manipulations =
            place_candidate(&mut model.objects[object].transform, &guide, mode, bounds, rng);
        applied.insert(referent, manipulations);
    }
    applied
}

/// Run a full render batch. Returns the run metadata on success.
pub fn run_render_job(
    job: &RenderJob,
    backend: &dyn RenderBackend,
) -> Result<RunMetadata, RenderError> {
    job.validate()
        .map_err(|msg| RenderError::new(RenderPhase::Initialization, msg))?;
    std::fs::create_dir_all(&job.output_dir).map_err(|e| {
        RenderError::with_source(
            RenderPhase::Initialization,
            format!("cannot create output directory {:?}", job.output_dir),
            e,
        )
    })?;

    let started_at = Utc::now();
    let start = std::time::Instant::now();
    let mut warnings = Vec::new();

    let spec = SceneSpec::from_file(&job.scene_config)
        .map_err(|e| RenderError::new(RenderPhase::ConfigLoad, format!("{:#}", e)))?;
    let scene_file = spec.resolved_scene_file(&job.scene_config);
    let mut model = SceneModel::load(&scene_file)
        .map_err(|e| RenderError::new(RenderPhase::SceneLoad, format!("{:#}", e)))?;

    let font = resolve_font(job, &mut warnings)?;
    let style = LabelStyle::default();

    let mut rng = match job.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let settings = enumerate_settings(
        model.candidates.len(),
        model.guides.len(),
        job.samples,
        job.max_candidates,
    );
    log::info!(
        "rendering {} settings for scene {:?} ({} candidates, {} guides)",
        settings.len(),
        spec.scene_name,
        model.candidates.len(),
        model.guides.len()
    );

    let behind = job.behind_policy();
    let mut frame_count = 0;

    for setting in &settings {
        let applied = apply_setting(&mut model, setting, job.mode, job.offset_bounds, &mut rng);

        let img = backend.render(&model, job.width, job.height)?;

        let frame_id = format!("{}.{:02}", spec.scene_name, setting.index);
        let frame_file = format!("{}.png", frame_id);
        let frame_path = job.output_dir.join(&frame_file);
        img.save(&frame_path).map_err(|e| {
            RenderError::with_source(
                RenderPhase::FrameSave,
                format!("cannot write frame {:?}", frame_path),
                e,
            )
        })?;

        // Labels go to visible referents in declaration order.
        let mut referents = std::collections::BTreeMap::new();
        let mut entries = Vec::new();
        let mut tags = Vec::new();
        let mut rects = Vec::new();
        let mut labeled = 0;
        for (i, referent) in model.referents.iter().enumerate() {
            if !model.referent_visible(i) {
                continue;
            }
            let bbox = camera_view_bounds(
                &model.camera,
                &model.referent_world_vertices(i),
                job.width,
                job.height,
                behind,
            );
            let label = overlay::referent_label(labeled);
            labeled += 1;

            let rect = bbox.to_pixel_rect(job.width, job.height);
            entries.push((label.clone(), rect));
            tags.push(referent.reference_frame);
            rects.push(rect);

            referents.insert(
                label,
                ReferentRecord {
                    name: referent.name.clone(),
                    bbox,
                    reference_frame: referent.reference_frame,
                    manipulations: applied.get(&i).cloned().unwrap_or_default(),
                },
            );
        }

        let labeled_img = overlay::composite_labels(&img, &entries, font.as_ref(), &style);
        let labeled_file = format!("{}.labeled.png", frame_id);
        let labeled_path = job.output_dir.join(&labeled_file);
        labeled_img.save(&labeled_path).map_err(|e| {
            RenderError::with_source(
                RenderPhase::FrameSave,
                format!("cannot write labeled frame {:?}", labeled_path),
                e,
            )
        })?;

        let arrow_file = match overlay::arrow_target(tags.iter().copied()) {
            Some(target) => {
                let arrow_img =
                    overlay::composite_arrow(&img, &rects[target], Rgba([200, 30, 30, 255]));
                let arrow_file = format!("{}.arrow.png", frame_id);
                let arrow_path = job.output_dir.join(&arrow_file);
                arrow_img.save(&arrow_path).map_err(|e| {
                    RenderError::with_source(
                        RenderPhase::FrameSave,
                        format!("cannot write arrow frame {:?}", arrow_path),
                        e,
                    )
                })?;
                Some(arrow_file)
            }
            None => None,
        };

        let record = FrameRecord {
            scene: spec.scene_name.clone(),
            scene_data: spec.clone(),
            frame: frame_id.clone(),
            frame_path: frame_file,
            labeled_frame_path: labeled_file,
            arrow_frame_path: arrow_file,
            referents,
        };
        let sidecar_path = job.output_dir.join(format!("{}.json", frame_id));
        record.save(&sidecar_path).map_err(|e| {
            RenderError::new(RenderPhase::SidecarWrite, format!("{:#}", e))
        })?;

        frame_count += 1;
        log::debug!("wrote frame {}", frame_id);
    }

    let scene_file_hash = hash_file(&scene_file).map_err(|e| {
        RenderError::with_source(
            RenderPhase::MetadataWrite,
            format!("cannot hash scene file {:?}", scene_file),
            e,
        )
    })?;

    let completed_at = Utc::now();
    let metadata = RunMetadata {
        job: job.clone(),
        started_at,
        completed_at,
        render_duration_secs: start.elapsed().as_secs_f64(),
        frame_count,
        scene_file_hash,
        scenestim_version: env!("CARGO_PKG_VERSION").to_string(),
        warnings,
    };
    let metadata_json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| RenderError::with_source(RenderPhase::MetadataWrite, "serialize metadata", e))?;
    std::fs::write(job.output_dir.join("metadata.json"), metadata_json).map_err(|e| {
        RenderError::with_source(RenderPhase::MetadataWrite, "write metadata.json", e)
    })?;

    log::info!(
        "rendered {} frames in {:.1}s",
        frame_count,
        metadata.render_duration_secs
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::scene::Transform;

    #[test]
    fn test_job_validation() {
        let job = RenderJob::new(
            PathBuf::from("/nonexistent/scene.json"),
            PathBuf::from("/tmp/out"),
            PlacementMode::Fixed,
        );
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_job_defaults() {
        let job = RenderJob::new(
            PathBuf::from("scene.json"),
            PathBuf::from("out"),
            PlacementMode::JitterPose,
        );
        assert_eq!(job.samples, 1);
        assert_eq!(job.width, 800);
        assert_eq!(job.height, 600);
        assert_eq!(job.seed, None);
        assert!(!job.exclude_behind);
    }

    #[test]
    fn test_zero_samples_rejected() {
        let dir = std::env::temp_dir();
        let config = dir.join(format!("scenestim-job-{}.json", std::process::id()));
        std::fs::write(&config, "{}").unwrap();
        let mut job = RenderJob::new(config.clone(), dir.join("out"), PlacementMode::Fixed);
        job.samples = 0;
        assert!(job.validate().is_err());
        std::fs::remove_file(&config).ok();
    }

    #[test]
    fn test_render_error_display() {
        let err = RenderError::new(RenderPhase::SceneLoad, "missing group");
        assert_eq!(format!("{}", err), "[Scene Load] missing group");
    }

    #[test]
    fn test_silhouette_renderer_paints_object() {
        let model = SceneModel {
            camera: Camera {
                position: [0.0, 0.0, 8.0],
                ..Camera::default()
            },
            objects: vec![crate::scene::test_object(
                "Man",
                Transform::default(),
                true,
            )],
            referents: vec![],
            candidates: vec![],
            guides: vec![],
        };
        let backend = SilhouetteRenderer::default();
        let img = backend.render(&model, 200, 200).unwrap();
        let center = img.get_pixel(100, 100);
        assert_ne!(*center, backend.background);
        let corner = img.get_pixel(2, 2);
        assert_eq!(*corner, backend.background);
    }

    #[test]
    fn test_hidden_object_not_painted() {
        let model = SceneModel {
            camera: Camera {
                position: [0.0, 0.0, 8.0],
                ..Camera::default()
            },
            objects: vec![crate::scene::test_object(
                "Man",
                Transform::default(),
                false,
            )],
            referents: vec![],
            candidates: vec![],
            guides: vec![],
        };
        let backend = SilhouetteRenderer::default();
        let img = backend.render(&model, 200, 200).unwrap();
        assert_eq!(*img.get_pixel(100, 100), backend.background);
    }
}
