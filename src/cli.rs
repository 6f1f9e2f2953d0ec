use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::placement::{OffsetBounds, PlacementMode};
use crate::render::{run_render_job, RenderJob, SilhouetteRenderer};
use crate::sampling::StimulusPlan;
use crate::scene::SceneSpec;
use crate::server::{self, AppState, ServerConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the full stimulus set for a scene
    Render {
        /// Scene config JSON (scene name, relations, prompts, scene file)
        scene_config: Option<PathBuf>,

        /// Output directory for frames and sidecars
        #[arg(long, default_value = "out")]
        out: PathBuf,

        /// Repeated random draws per setting
        #[arg(long, default_value_t = 1)]
        samples: usize,

        /// Placement randomization mode
        #[arg(long, value_enum, default_value = "none")]
        mode: PlacementMode,

        /// Cap on candidate subset size
        #[arg(long)]
        max_candidates: Option<usize>,

        /// Output width in pixels
        #[arg(long, default_value_t = 800)]
        width: u32,

        /// Output height in pixels
        #[arg(long, default_value_t = 600)]
        height: u32,

        /// RNG seed; omit for a fresh draw each run
        #[arg(long)]
        seed: Option<u64>,

        /// TTF font for label letters; omit to probe system locations
        #[arg(long)]
        font: Option<PathBuf>,

        /// Lower bound for the offset placement mode
        #[arg(long, default_value_t = -2.0, allow_hyphen_values = true)]
        offset_min: f32,

        /// Upper bound for the offset placement mode
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_max: f32,

        /// Drop vertices behind the camera from bounding boxes
        #[arg(long)]
        exclude_behind: bool,
    },

    /// Serve sampled stimuli and rendered images over HTTP
    Serve {
        /// Scene config JSON
        scene_config: PathBuf,

        /// Directory holding rendered frames and sidecars
        #[arg(long, default_value = "out")]
        renders: PathBuf,

        /// Port to listen on
        #[arg(long, default_value_t = 5000)]
        port: u16,

        /// Stimulus plan JSON; omit for a single-part plan over --renders
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Frames per request for the default single-part plan
        #[arg(long, default_value_t = 3)]
        max_requests: usize,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            scene_config,
            out,
            samples,
            mode,
            max_candidates,
            width,
            height,
            seed,
            font,
            offset_min,
            offset_max,
            exclude_behind,
        } => {
            let Some(scene_config) = scene_config else {
                println!("No scene config given; nothing to render.");
                return Ok(());
            };
            let job = RenderJob {
                scene_config,
                output_dir: out,
                samples,
                mode,
                max_candidates,
                width,
                height,
                seed,
                font,
                offset_bounds: OffsetBounds {
                    min: offset_min,
                    max: offset_max,
                },
                exclude_behind,
            };
            let backend = SilhouetteRenderer {
                behind: job.behind_policy(),
                ..SilhouetteRenderer::default()
            };
            let metadata = run_render_job(&job, &backend)?;
            println!(
                "Rendered {} frames to {:?} in {:.1}s",
                metadata.frame_count, job.output_dir, metadata.render_duration_secs
            );
            Ok(())
        }

        Commands::Serve {
            scene_config,
            renders,
            port,
            plan,
            max_requests,
        } => {
            let spec = SceneSpec::from_file(&scene_config)?;
            let plan = match plan {
                Some(path) => StimulusPlan::from_file(&path)?,
                None => StimulusPlan::single_part(max_requests),
            };
            let state = AppState::load(ServerConfig {
                spec,
                renders_dir: renders,
                plan,
                port,
            })?;
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(server::serve(Arc::new(state)))
        }
    }
}
