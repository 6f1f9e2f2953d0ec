//! Frame sidecar records and corpus loading.
//!
//! One JSON sidecar is written per rendered setting and is the durable unit
//! the stimulus server consumes. Records are written once and never mutated;
//! the server only reads.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::placement::Manipulations;
use crate::projection::Box;
use crate::scene::{ReferenceFrame, SceneSpec};

/// Per-referent entry in a frame sidecar, keyed by label letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferentRecord {
    pub name: String,
    pub bbox: Box,
    pub reference_frame: Option<ReferenceFrame>,
    pub manipulations: Manipulations,
}

/// The JSON sidecar for one rendered setting.
///
/// Image paths are bare file names relative to the output directory, which
/// is how the server's `/renders/{fname}` endpoint addresses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub scene: String,
    /// The experiment config, embedded so prompts can be formatted without
    /// access to the original config file.
    pub scene_data: SceneSpec,
    /// Frame identifier, `{scene}.{NN}`.
    pub frame: String,
    pub frame_path: String,
    pub labeled_frame_path: String,
    /// Null when the arrow artifact was not produced for this frame.
    pub arrow_frame_path: Option<String>,
    pub referents: BTreeMap<String, ReferentRecord>,
}

impl FrameRecord {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .with_context(|| format!("failed to serialize frame record {:?}", self.frame))?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write frame record {:?}", path))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read frame record {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse frame record {:?}", path))
    }
}

/// Numeric frame index parsed out of a sidecar file name, so that
/// `scene.100.json` orders after `scene.99.json`.
fn frame_index(name: &str, prefix: &str) -> Option<u64> {
    name.strip_prefix(prefix)?.strip_suffix(".json")?.parse().ok()
}

/// Load every `{scene_name}.*.json` sidecar in a directory, ordered by frame
/// index so corpus position matches setting index. Files without a numeric
/// suffix sort last, by name.
pub fn load_corpus(dir: &Path, scene_name: &str) -> Result<Vec<FrameRecord>> {
    let prefix = format!("{}.", scene_name);
    let mut paths = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read render directory {:?}", dir))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".json") {
            let index = frame_index(&name, &prefix).unwrap_or(u64::MAX);
            paths.push((index, name, entry.path()));
        }
    }
    paths.sort();

    let mut records = Vec::with_capacity(paths.len());
    for (_, _, path) in paths {
        records.push(FrameRecord::from_file(&path)?);
    }
    log::info!(
        "loaded {} frame records for scene {:?} from {:?}",
        records.len(),
        scene_name,
        dir
    );
    Ok(records)
}
