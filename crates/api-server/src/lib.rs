//! REST API server for the emoji vision pipeline
//!
//! Public surface:
//! - `GET /analyze?url=...` - download an external image, analyze, JSON
//! - `GET /analyze?file=...` - analyze a local file in place, JSON
//! - `POST /analyze` - multipart upload (field `image`), analyze, JSON
//! - `GET /health` - overall roster health
//! - `GET /services/health` - per-analyzer health reports
//! - `GET /uploads/<name>` - stored images, fetched back by distributed
//!   analyzers when the input arrived by URL or upload

mod download;
mod handlers;
mod pipeline;
mod types;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use emoji_vision_captions::SimilarityScorer;
use emoji_vision_common::{AppConfig, PipelineError};
use emoji_vision_orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use handlers::*;
pub use pipeline::{assemble_response, run_pipeline};
pub use types::*;

/// API server state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    /// Immutable configuration, built once at startup
    pub config: Arc<AppConfig>,
    /// Fan-out orchestrator over the analyzer roster
    pub orchestrator: Arc<Orchestrator>,
    /// Caption similarity scorer, absent when no CLIP analyzer is configured
    pub scorer: Option<SimilarityScorer>,
}

impl ApiState {
    /// Create API state from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator clients cannot be built or the
    /// uploads directory cannot be created.
    pub fn new(config: AppConfig) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&config.server.upload_dir)?;
        let orchestrator = Orchestrator::new(&config)?;

        let scorer = match config.roster().get("clip") {
            Some(clip) => {
                match SimilarityScorer::new(
                    clip,
                    Duration::from_secs(config.server.analyzer_timeout_secs),
                ) {
                    Ok(scorer) => Some(scorer),
                    Err(e) => {
                        warn!("Similarity scorer unavailable: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            scorer,
        })
    }

    /// Public URL of one stored upload
    #[must_use]
    pub fn public_upload_url(&self, file_name: &str) -> String {
        format!(
            "{}/uploads/{file_name}",
            self.config.server.public_base_url.trim_end_matches('/')
        )
    }
}

/// Build the API router with all endpoints
pub fn build_router(state: ApiState) -> Router {
    let max_body = state.config.server.max_file_size as usize;
    let uploads = ServeDir::new(&state.config.server.upload_dir);
    Router::new()
        .route("/analyze", get(analyze_get).post(analyze_post))
        .route("/health", get(health_check))
        .route("/services/health", get(services_health))
        .nest_service("/uploads", uploads)
        // Leave headroom for multipart framing around the image itself
        .layer(DefaultBodyLimit::max(max_body + 64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the API server
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn start_server(addr: &str, state: ApiState) -> Result<(), std::io::Error> {
    tracing::info!("Starting API server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await
}
