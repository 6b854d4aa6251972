//! HTTP request handlers for API endpoints

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};

use crate::download::{download_to_uploads, extension_for_mime, persist_bytes};
use crate::pipeline::run_pipeline;
use crate::types::{
    ErrorResponse, HealthResponse, ImageData, ProcessingMethod, ServicesHealthResponse,
};
use crate::ApiState;
use emoji_vision_analyzer_client::{probe_roster, HealthState};
use emoji_vision_common::PipelineError;
use emoji_vision_orchestrator::ImageHandle;

/// Error reply type shared by all handlers
type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl Into<String>, details: Option<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(error, details)),
    )
}

fn server_error(error: impl Into<String>, details: Option<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(error, details)),
    )
}

fn ingress_error(e: &PipelineError) -> ApiError {
    match e {
        PipelineError::InvalidInput(_)
        | PipelineError::UnsupportedMediaType(_)
        | PipelineError::FileTooLarge { .. }
        | PipelineError::Download(_) => bad_request(e.to_string(), None),
        other => server_error("analysis failed", Some(other.to_string())),
    }
}

/// `GET /analyze?url=...` or `GET /analyze?file=...`
#[derive(Debug, Deserialize)]
pub struct AnalyzeParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Analyze an image referenced by URL or local path
pub async fn analyze_get(
    State(state): State<ApiState>,
    Query(params): Query<AnalyzeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (handle, image_data) = match (params.url, params.file) {
        (Some(url), _) => {
            let stored = download_to_uploads(
                &url,
                &state.config.server.upload_dir,
                state.config.server.max_file_size,
            )
            .await
            .map_err(|e| {
                error!("Download failed for {}: {}", url, e);
                ingress_error(&e)
            })?;
            let public_url = state.public_upload_url(&stored.file_name);
            info!("Analyzing downloaded image as {}", public_url);
            (
                ImageHandle::LocalUrl {
                    url: public_url.clone(),
                    path: stored.path,
                },
                ImageData {
                    dimensions: None,
                    processing_method: ProcessingMethod::ExternalUrlDownloaded,
                    image_url: Some(public_url),
                    file_path: None,
                    original_url: Some(url),
                },
            )
        }
        (None, Some(file)) => {
            let path = PathBuf::from(&file);
            if !path.exists() {
                return Err(bad_request(
                    format!("Input file does not exist: {file}"),
                    None,
                ));
            }
            info!("Analyzing local file in place: {}", file);
            (
                ImageHandle::File { path },
                ImageData {
                    dimensions: None,
                    processing_method: ProcessingMethod::DirectFileAccess,
                    image_url: None,
                    file_path: Some(file),
                    original_url: None,
                },
            )
        }
        (None, None) => {
            return Err(bad_request(
                "Missing input: provide either ?url= or ?file=",
                None,
            ));
        }
    };

    let response = run_pipeline(&state, handle, image_data).await;
    Ok(Json(response))
}

/// Analyze an uploaded image (`POST /analyze`, multipart field `image`)
pub async fn analyze_post(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut stored = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        bad_request("Malformed multipart body", Some(e.to_string()))
    })? {
        if field.name() != Some("image") {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        let Some(extension) = extension_for_mime(&content_type) else {
            return Err(bad_request(
                format!("Unsupported media type: {content_type}"),
                None,
            ));
        };

        let bytes = field.bytes().await.map_err(|e| {
            bad_request("Failed to read upload", Some(e.to_string()))
        })?;
        if bytes.len() as u64 > state.config.server.max_file_size {
            return Err(bad_request(
                format!(
                    "File too large: {} bytes (max: {})",
                    bytes.len(),
                    state.config.server.max_file_size
                ),
                None,
            ));
        }

        stored = Some(
            persist_bytes(&bytes, extension, &state.config.server.upload_dir).map_err(|e| {
                error!("Failed to store upload: {}", e);
                server_error("failed to store upload", Some(e.to_string()))
            })?,
        );
        break;
    }

    let Some(stored) = stored else {
        return Err(bad_request("Missing multipart field 'image'", None));
    };

    let public_url = state.public_upload_url(&stored.file_name);
    info!("Analyzing uploaded image as {}", public_url);
    let image_data = ImageData {
        dimensions: None,
        processing_method: ProcessingMethod::FileUpload,
        image_url: Some(public_url.clone()),
        file_path: None,
        original_url: None,
    };
    let handle = ImageHandle::LocalUrl {
        url: public_url,
        path: stored.path,
    };

    let response = run_pipeline(&state, handle, image_data).await;
    Ok(Json(response))
}

/// Overall health classification from per-analyzer states
fn overall_status(healthy: usize, total: usize) -> &'static str {
    if total == 0 || healthy == total {
        "healthy"
    } else if healthy == 0 {
        "critical"
    } else {
        "degraded"
    }
}

/// `GET /health`
pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let reports = probe_roster(state.orchestrator.clients()).await;
    let healthy = reports
        .iter()
        .filter(|r| r.status == HealthState::Healthy)
        .count();
    Json(HealthResponse {
        status: overall_status(healthy, reports.len()).to_string(),
        healthy_services: format!("{healthy}/{}", reports.len()),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs(),
    })
}

/// `GET /services/health`
pub async fn services_health(State(state): State<ApiState>) -> impl IntoResponse {
    let reports = probe_roster(state.orchestrator.clients()).await;
    let healthy = reports
        .iter()
        .filter(|r| r.status == HealthState::Healthy)
        .count();
    Json(ServicesHealthResponse {
        status: overall_status(healthy, reports.len()).to_string(),
        services: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_classification() {
        assert_eq!(overall_status(0, 0), "healthy");
        assert_eq!(overall_status(12, 12), "healthy");
        assert_eq!(overall_status(9, 12), "degraded");
        assert_eq!(overall_status(0, 12), "critical");
    }
}
