//! Stimulus HTTP server.
//!
//! Two routes: `/stimuli` samples a fresh stimulus set per request from the
//! pre-rendered corpus, `/renders/{fname}` streams a PNG from the renders
//! directory. All state is loaded at startup into an explicit `AppState`
//! passed to the router; requests are stateless and the corpus is never
//! mutated, so no locking is needed.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::Method;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::corpus::{load_corpus, FrameRecord};
use crate::sampling::{sample_stimuli, Stimulus, StimulusPlan};
use crate::scene::SceneSpec;

/// Server configuration, assembled by the CLI and handed to `AppState::load`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub spec: SceneSpec,
    pub renders_dir: PathBuf,
    pub plan: StimulusPlan,
    pub port: u16,
}

/// Immutable state shared by all request handlers. One corpus per plan part,
/// loaded once at startup.
pub struct AppState {
    pub config: ServerConfig,
    pub corpora: Vec<Vec<FrameRecord>>,
}

impl AppState {
    pub fn load(config: ServerConfig) -> Result<Self> {
        let mut corpora = Vec::with_capacity(config.plan.parts.len());
        for part in &config.plan.parts {
            let dir = config.renders_dir.join(&part.subdir);
            let corpus = load_corpus(&dir, &config.spec.scene_name)
                .with_context(|| format!("loading corpus for part {:?}", part.name))?;
            if corpus.is_empty() {
                log::warn!("part {:?} has an empty corpus in {:?}", part.name, dir);
            }
            corpora.push(corpus);
        }
        Ok(Self { config, corpora })
    }
}

#[derive(Serialize)]
struct StimuliResponse {
    stimuli: Vec<Stimulus>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stimuli", get(get_stimuli))
        .route("/renders/{*fname}", get(get_render))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any)
}

async fn get_stimuli(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StimuliResponse>, StatusCode> {
    let mut rng = rand::thread_rng();
    let stimuli = sample_stimuli(&state.config.plan, &state.corpora, &mut rng).map_err(|e| {
        log::error!("stimulus sampling failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(StimuliResponse { stimuli }))
}

/// Resolve a requested render file name inside the renders directory.
/// Anything that would escape the directory (absolute paths, `..`, drive
/// prefixes) is rejected.
pub fn sanitize_render_path(renders_dir: &Path, fname: &str) -> Option<PathBuf> {
    let rel = Path::new(fname);
    if rel.as_os_str().is_empty() {
        return None;
    }
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(renders_dir.join(rel))
}

async fn get_render(
    State(state): State<Arc<AppState>>,
    UrlPath(fname): UrlPath<String>,
) -> Result<Response, StatusCode> {
    let path = sanitize_render_path(&state.config.renders_dir, &fname)
        .ok_or(StatusCode::NOT_FOUND)?;
    let bytes = tokio::fs::read(&path).await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    log::info!("serving stimuli for {:?} on {}", state.config.spec.scene_name, addr);
    axum::serve(listener, app(state)).await.context("server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::corpus::FrameRecord;

    fn spec() -> SceneSpec {
        SceneSpec {
            scene_name: "mancar".into(),
            scene_file: "mancar.model.json".into(),
            relations: vec!["in front of".into(), "near".into()],
            prompts: [
                ("confirm".to_string(), "Is A {relation} the {ground}?".to_string()),
                (
                    "count".to_string(),
                    "How many objects are {relation} the {ground}?".to_string(),
                ),
            ]
            .into_iter()
            .collect(),
            ground: "car".into(),
        }
    }

    fn frame(i: usize) -> FrameRecord {
        FrameRecord {
            scene: "mancar".into(),
            scene_data: spec(),
            frame: format!("mancar.{:02}", i),
            frame_path: format!("mancar.{:02}.png", i),
            labeled_frame_path: format!("mancar.{:02}.labeled.png", i),
            arrow_frame_path: None,
            referents: BTreeMap::new(),
        }
    }

    fn state(renders_dir: PathBuf) -> Arc<AppState> {
        Arc::new(AppState {
            config: ServerConfig {
                spec: spec(),
                renders_dir,
                plan: StimulusPlan::single_part(2),
                port: 0,
            },
            corpora: vec![(0..4).map(frame).collect()],
        })
    }

    #[tokio::test]
    async fn test_stimuli_endpoint_serves_envelope() {
        let app = app(state(std::env::temp_dir()));
        let res = app
            .oneshot(Request::builder().uri("/stimuli").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let stimuli = body["stimuli"].as_array().unwrap();
        assert_eq!(stimuli.len(), 2);
        for s in stimuli {
            assert_eq!(s["scene"], "mancar");
            // Templates substitute the ground object in.
            assert!(s["prompt"].as_str().unwrap().contains("car"));
        }
    }

    #[tokio::test]
    async fn test_renders_traversal_returns_404() {
        let app = app(state(PathBuf::from("/srv/renders")));
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/renders/../secrets.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_renders_missing_file_returns_404() {
        let app = app(state(std::env::temp_dir()));
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/renders/no-such-frame.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_renders_streams_png() {
        let dir = std::env::temp_dir().join(format!("scenestim-server-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("mancar.00.png"), b"not-really-a-png").unwrap();

        let app = app(state(dir.clone()));
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/renders/mancar.00.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"not-really-a-png");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sanitize_accepts_plain_names() {
        let dir = Path::new("/srv/renders");
        assert_eq!(
            sanitize_render_path(dir, "mancar.00.png"),
            Some(PathBuf::from("/srv/renders/mancar.00.png"))
        );
        // Part subdirectories are fine.
        assert_eq!(
            sanitize_render_path(dir, "1/mancar.00.png"),
            Some(PathBuf::from("/srv/renders/1/mancar.00.png"))
        );
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        let dir = Path::new("/srv/renders");
        assert_eq!(sanitize_render_path(dir, "../etc/passwd"), None);
        assert_eq!(sanitize_render_path(dir, "a/../../etc/passwd"), None);
        assert_eq!(sanitize_render_path(dir, "/etc/passwd"), None);
        assert_eq!(sanitize_render_path(dir, ""), None);
    }
}
