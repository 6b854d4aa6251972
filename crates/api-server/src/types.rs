//! API response types

use emoji_vision_analyzer_client::HealthReport;
use emoji_vision_captions::CaptionRecord;
use emoji_vision_common::{Dimensions, Prediction, ServiceState};
use emoji_vision_orchestrator::ServiceHealthSummary;
use emoji_vision_voting::{ConsensusItem, SpecialDetections, VoteCounters};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the image reached the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    /// Multipart upload stored locally
    FileUpload,
    /// External URL downloaded locally
    ExternalUrlDownloaded,
    /// Local path analyzed in place
    DirectFileAccess,
}

/// Provenance block of the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    /// Original image dimensions, when measurable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    /// How the image reached the pipeline
    pub processing_method: ProcessingMethod,
    /// Public URL analyzers fetched the image from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Local path, for direct file access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// The URL the caller originally supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

/// Consensus block of the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotesBlock {
    /// Ranked emoji consensus
    pub consensus: Vec<ConsensusItem>,
    /// Vote bookkeeping
    pub debug: VoteCounters,
}

/// Per-service compact result retained in the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactResult {
    pub ok: bool,
    pub status: ServiceState,
    pub predictions: Vec<Prediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

/// The single output document for one analyzed image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    /// False when any analyzer was degraded; partial data is still present
    pub success: bool,
    /// Fresh UUID for this analysis
    pub image_id: String,
    /// End-to-end wall-clock in seconds
    pub analysis_time_seconds: f64,
    /// Image provenance
    pub image_data: ImageData,
    /// Ranked consensus
    pub votes: VotesBlock,
    /// Out-of-competition sidecars
    pub special: SpecialDetections,
    /// Caption records, best first
    pub captions: Vec<CaptionRecord>,
    /// Per-service compact results, sorted by service id
    pub results: BTreeMap<String, CompactResult>,
    /// Present iff at least one analyzer was degraded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_health_summary: Option<ServiceHealthSummary>,
}

/// Error payload for failed requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Build an error payload
    #[must_use]
    pub fn new(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details,
        }
    }
}

/// `GET /health` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded, critical or error
    pub status: String,
    /// `"n/m"` healthy analyzers
    pub healthy_services: String,
    /// Unix timestamp of the check
    pub timestamp: u64,
}

/// `GET /services/health` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesHealthResponse {
    /// Overall status derived from the per-analyzer reports
    pub status: String,
    /// Per-analyzer probe reports in roster order
    pub services: Vec<HealthReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_method_serialization() {
        assert_eq!(
            serde_json::to_string(&ProcessingMethod::FileUpload).unwrap(),
            "\"file_upload\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessingMethod::ExternalUrlDownloaded).unwrap(),
            "\"external_url_downloaded\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessingMethod::DirectFileAccess).unwrap(),
            "\"direct_file_access\""
        );
    }

    #[test]
    fn test_error_response_shape() {
        let err = ErrorResponse::new("analysis failed", Some("boom".to_string()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "analysis failed");
        assert_eq!(json["details"], "boom");
    }
}
