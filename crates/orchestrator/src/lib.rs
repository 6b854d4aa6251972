//! Fan-out orchestrator
//!
//! Sends one image to every analyzer on the roster in parallel, collects
//! whatever comes back within the global deadline, and reports per-service
//! status. An individual analyzer failing, timing out or being offline never
//! fails the request; the pipeline runs on whatever partial results arrived.
//!
//! The orchestrator never depends on completion order: results are keyed by
//! analyzer id and statuses are reported in roster (configuration) order.

use emoji_vision_analyzer_client::AnalyzerClient;
use emoji_vision_common::{
    AnalysisResult, AnalyzerRoster, AppConfig, Dimensions, ErrorKind, PipelineError,
    ServiceState, ServiceStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use tracing::{info, warn};

/// Slack added to the per-analyzer deadline to form the global budget
const GLOBAL_SLACK: Duration = Duration::from_secs(2);

/// How one image is handed to the analyzers
#[derive(Debug, Clone)]
pub enum ImageHandle {
    /// Stored locally after a download or upload; analyzers fetch it over
    /// HTTP via the public URL while dimensions come from the local path
    LocalUrl { url: String, path: PathBuf },
    /// Direct local file, passed by path to co-located analyzers (zero-copy)
    File { path: PathBuf },
}

impl ImageHandle {
    /// Local path used for central dimension measurement
    #[must_use]
    pub fn local_path(&self) -> &Path {
        match self {
            Self::LocalUrl { path, .. } | Self::File { path } => path,
        }
    }
}

/// Degraded-roster summary attached to the response when any analyzer failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealthSummary {
    /// Ids of analyzers that did not succeed, in roster order
    pub degraded_services: Vec<String>,
    /// Number of degraded analyzers
    pub failed_count: usize,
    /// Roster size
    pub total_services: usize,
}

/// Everything the fan-out produced for one image
#[derive(Debug, Clone)]
pub struct FanOutReport {
    /// Per-analyzer results keyed by analyzer id
    pub results: BTreeMap<String, AnalysisResult>,
    /// Per-analyzer call status in roster order
    pub statuses: Vec<ServiceStatus>,
    /// Original image dimensions, when the local bytes were readable
    pub dimensions: Option<Dimensions>,
    /// Present iff at least one analyzer is degraded
    pub health_summary: Option<ServiceHealthSummary>,
    /// Total fan-out wall-clock
    pub elapsed: Duration,
}

/// Fan-out orchestrator over an immutable analyzer roster
pub struct Orchestrator {
    clients: Vec<AnalyzerClient>,
    roster: AnalyzerRoster,
    global_budget: Duration,
}

impl Orchestrator {
    /// Build the orchestrator and its per-analyzer clients from config
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn new(config: &AppConfig) -> Result<Self, PipelineError> {
        let roster = config.roster();
        let timeout = Duration::from_secs(config.server.analyzer_timeout_secs);
        let mut clients = Vec::with_capacity(roster.len());
        for analyzer in roster.iter() {
            let client = AnalyzerClient::new(
                analyzer.clone(),
                timeout,
                config.server.max_retries,
                config.server.image_root.clone(),
            )
            .map_err(|e| PipelineError::Config(e.to_string()))?;
            clients.push(client);
        }
        Ok(Self {
            clients,
            roster,
            global_budget: timeout + GLOBAL_SLACK,
        })
    }

    /// The immutable roster this orchestrator fans out to
    #[must_use]
    pub fn roster(&self) -> &AnalyzerRoster {
        &self.roster
    }

    /// Per-analyzer clients, in roster order
    #[must_use]
    pub fn clients(&self) -> &[AnalyzerClient] {
        &self.clients
    }

    /// Analyze one image with every analyzer in parallel
    pub async fn analyze(&self, image: &ImageHandle) -> FanOutReport {
        let started = Instant::now();
        let dimensions = measure_dimensions(image.local_path());
        let deadline = started + self.global_budget;

        info!(
            "Fanning out to {} analyzers (budget {:?})",
            self.clients.len(),
            self.global_budget
        );

        let mut handles = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            let client = client.clone();
            let image = image.clone();
            let tokio_deadline = tokio::time::Instant::from_std(deadline);
            let handle = tokio::spawn(async move {
                let call_started = Instant::now();
                let call = async {
                    match &image {
                        ImageHandle::LocalUrl { url, .. } => {
                            client.analyze_url(url, deadline).await
                        }
                        ImageHandle::File { path } => client.analyze_file(path, deadline).await,
                    }
                };
                // The client honors the deadline itself; the outer timeout
                // converts a wedged call into a plain timeout result
                let result = match timeout_at(tokio_deadline, call).await {
                    Ok(result) => result,
                    Err(_) => AnalysisResult::failure(ErrorKind::Timeout, "global deadline"),
                };
                (result, call_started.elapsed())
            });
            handles.push(handle);
        }

        let mut results = BTreeMap::new();
        let mut statuses = Vec::with_capacity(handles.len());
        for (handle, client) in handles.into_iter().zip(&self.clients) {
            let id = client.analyzer().id.clone();
            let (result, call_elapsed) = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => (
                    AnalysisResult::failure(ErrorKind::Offline, format!("task failed: {e}")),
                    Duration::ZERO,
                ),
            };
            statuses.push(status_for(&id, &result, call_elapsed));
            results.insert(id, result);
        }

        let health_summary = summarize_health(&statuses);
        if let Some(summary) = &health_summary {
            warn!(
                "{}/{} analyzers degraded: {:?}",
                summary.failed_count, summary.total_services, summary.degraded_services
            );
        }

        FanOutReport {
            results,
            statuses,
            dimensions,
            health_summary,
            elapsed: started.elapsed(),
        }
    }
}

/// Derive the reported status for one analyzer call
fn status_for(id: &str, result: &AnalysisResult, elapsed: Duration) -> ServiceStatus {
    let status = if result.ok {
        ServiceState::Success
    } else {
        match result.error_kind {
            Some(ErrorKind::Timeout) => ServiceState::Timeout,
            Some(ErrorKind::Offline) => ServiceState::Offline,
            _ => ServiceState::Error,
        }
    };
    ServiceStatus {
        service: id.to_string(),
        status,
        processing_time_ms: elapsed.as_millis() as u64,
        prediction_count: result.predictions.len(),
        error_message: result.error_message.clone(),
    }
}

/// Build the degraded-roster summary; `None` when everything succeeded
fn summarize_health(statuses: &[ServiceStatus]) -> Option<ServiceHealthSummary> {
    let degraded_services: Vec<String> = statuses
        .iter()
        .filter(|s| s.status != ServiceState::Success)
        .map(|s| s.service.clone())
        .collect();
    if degraded_services.is_empty() {
        return None;
    }
    Some(ServiceHealthSummary {
        failed_count: degraded_services.len(),
        total_services: statuses.len(),
        degraded_services,
    })
}

/// Measure image dimensions once, centrally, from the local bytes
///
/// A header-only read; failure degrades to `None` and coordinate rescaling
/// becomes the identity downstream.
fn measure_dimensions(path: &Path) -> Option<Dimensions> {
    match image::image_dimensions(path) {
        Ok((width, height)) => Some(Dimensions::new(width, height)),
        Err(e) => {
            warn!("Cannot measure dimensions of {}: {e}", path.display());
            None
        }
    }
}
