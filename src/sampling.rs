//! Stimulus sampling: which frames a request gets, and with what prompt.
//!
//! The plan is data: each experiment part names a corpus subdirectory, how
//! many frames it contributes, and the rules for picking the relation term
//! and the prompt template. Disallowed (relation, prompt) combinations are
//! avoided by rejection sampling with a deterministic fallback scan, so a
//! request can never spin forever.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::corpus::{FrameRecord, ReferentRecord};

/// Attempts before falling back to a deterministic scan of the templates.
const REJECTION_ATTEMPTS: usize = 16;

/// How a part picks its relation term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationRule {
    /// Always the same relation.
    Fixed { relation: String },
    /// Weighted coin: `relation` with probability `weight`, else `fallback`.
    Weighted {
        relation: String,
        weight: f64,
        fallback: String,
    },
    /// Uniform over the scene's declared relations.
    Uniform,
}

/// How a part picks its prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptRule {
    /// Always the named template.
    Fixed { prompt_type: String },
    /// Uniform over the scene's templates, rejecting disallowed pairs.
    Uniform,
}

/// A (relation, prompt type) combination that must never be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisallowedPair {
    pub relation: String,
    pub prompt_type: String,
}

/// One experiment part: a corpus and its sampling rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartConfig {
    pub name: String,
    /// Corpus subdirectory under the renders directory; "." for the
    /// directory itself.
    #[serde(default = "default_subdir")]
    pub subdir: PathBuf,
    /// Frames contributed per request; clamped to the pool size.
    pub max_requests: usize,
    pub relation: RelationRule,
    pub prompt: PromptRule,
}

fn default_subdir() -> PathBuf {
    PathBuf::from(".")
}

/// The full sampling plan for the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusPlan {
    pub parts: Vec<PartConfig>,
    #[serde(default)]
    pub disallowed: Vec<DisallowedPair>,
}

impl StimulusPlan {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stimulus plan {:?}", path))?;
        let plan: StimulusPlan = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse stimulus plan {:?}", path))?;
        if plan.parts.is_empty() {
            bail!("stimulus plan {:?} declares no parts", path);
        }
        Ok(plan)
    }

    /// Single-part plan over a flat renders directory, with the near/count
    /// combination excluded.
    pub fn single_part(max_requests: usize) -> Self {
        Self {
            parts: vec![PartConfig {
                name: "main".into(),
                subdir: default_subdir(),
                max_requests,
                relation: RelationRule::Uniform,
                prompt: PromptRule::Uniform,
            }],
            disallowed: vec![DisallowedPair {
                relation: "near".into(),
                prompt_type: "count".into(),
            }],
        }
    }

    fn is_allowed(&self, relation: &str, prompt_type: &str) -> bool {
        !self
            .disallowed
            .iter()
            .any(|d| d.relation == relation && d.prompt_type == prompt_type)
    }
}

/// The payload served per sampled frame.
#[derive(Debug, Clone, Serialize)]
pub struct Stimulus {
    pub scene: String,
    pub frame: String,
    pub referents: BTreeMap<String, ReferentRecord>,

    pub relation: String,
    pub prompt_type: String,
    pub prompt: String,

    pub frame_path: String,
    pub labeled_frame_path: String,
    pub arrow_frame_path: Option<String>,
}

/// Substitute sampled values into a prompt template.
pub fn format_prompt(template: &str, relation: &str, ground: &str, name: Option<&str>) -> String {
    let mut out = template
        .replace("{relation}", relation)
        .replace("{ground}", ground);
    if let Some(name) = name {
        out = out.replace("{name}", name);
    }
    out
}

fn choose_relation(
    rule: &RelationRule,
    relations: &[String],
    rng: &mut impl Rng,
) -> Result<String> {
    match rule {
        RelationRule::Fixed { relation } => Ok(relation.clone()),
        RelationRule::Weighted {
            relation,
            weight,
            fallback,
        } => {
            if rng.gen::<f64>() < *weight {
                Ok(relation.clone())
            } else {
                Ok(fallback.clone())
            }
        }
        RelationRule::Uniform => relations
            .choose(rng)
            .cloned()
            .context("scene declares no relations to sample from"),
    }
}

fn choose_prompt(
    rule: &PromptRule,
    prompts: &BTreeMap<String, String>,
    relation: &str,
    plan: &StimulusPlan,
    rng: &mut impl Rng,
) -> Result<String> {
    match rule {
        PromptRule::Fixed { prompt_type } => {
            if !prompts.contains_key(prompt_type) {
                bail!("prompt template {:?} not declared by the scene", prompt_type);
            }
            Ok(prompt_type.clone())
        }
        PromptRule::Uniform => {
            let names: Vec<&String> = prompts.keys().collect();
            if names.is_empty() {
                bail!("scene declares no prompt templates");
            }
            for _ in 0..REJECTION_ATTEMPTS {
                let name = names[rng.gen_range(0..names.len())];
                if plan.is_allowed(relation, name) {
                    return Ok(name.clone());
                }
            }
            // Every draw was rejected; scan for any allowed template.
            names
                .iter()
                .find(|n| plan.is_allowed(relation, n.as_str()))
                .map(|n| n.to_string())
                .with_context(|| {
                    format!("no prompt template is allowed with relation {:?}", relation)
                })
        }
    }
}

fn prepare_stimulus(frame: &FrameRecord, relation: String, prompt_type: String) -> Result<Stimulus> {
    let meta = &frame.scene_data;
    let template = meta.prompts.get(&prompt_type).with_context(|| {
        format!(
            "frame {:?} carries no prompt template {:?}",
            frame.frame, prompt_type
        )
    })?;
    let prompt = format_prompt(template, &relation, &meta.ground, Some(&meta.scene_name));

    Ok(Stimulus {
        scene: frame.scene.clone(),
        frame: frame.frame.clone(),
        referents: frame.referents.clone(),
        relation,
        prompt_type,
        prompt,
        frame_path: frame.frame_path.clone(),
        labeled_frame_path: frame.labeled_frame_path.clone(),
        arrow_frame_path: frame.arrow_frame_path.clone(),
    })
}

/// Sample one response worth of stimuli. `corpora` is parallel to
/// `plan.parts`. Short pools are clamped, never an error.
pub fn sample_stimuli(
    plan: &StimulusPlan,
    corpora: &[Vec<FrameRecord>],
    rng: &mut impl Rng,
) -> Result<Vec<Stimulus>> {
    let mut out = Vec::new();
    for (part, pool) in plan.parts.iter().zip(corpora) {
        let n = part.max_requests.min(pool.len());
        for idx in rand::seq::index::sample(rng, pool.len(), n) {
            let frame = &pool[idx];
            let relation = choose_relation(&part.relation, &frame.scene_data.relations, rng)?;
            let prompt_type =
                choose_prompt(&part.prompt, &frame.scene_data.prompts, &relation, plan, rng)?;
            out.push(prepare_stimulus(frame, relation, prompt_type)?);
        }
    }
    out.shuffle(rng);
    Ok(out)
}
