//! Analyzer health probing
//!
//! Each analyzer exposes `GET /health`. The probe classifies every roster
//! member as healthy, offline or error, with response timing; the API server
//! aggregates the reports into the public health endpoints.

use crate::AnalyzerClient;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Deadline for a single health probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probe outcome for one analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Offline,
    Error,
}

/// Health report for one analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Analyzer id
    pub service: String,
    /// Human-readable name
    pub name: String,
    /// Probe outcome
    pub status: HealthState,
    /// Probe round-trip in milliseconds
    pub response_time_ms: u64,
    /// Unix timestamp of the probe
    pub last_check: u64,
    /// Error detail for non-healthy outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzerClient {
    /// Probe this analyzer's health endpoint
    pub async fn probe_health(&self) -> HealthReport {
        let analyzer = self.analyzer();
        let started = Instant::now();
        let outcome = self
            .http_client()
            .get(analyzer.health_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        let response_time_ms = started.elapsed().as_millis() as u64;
        let (status, error) = match outcome {
            Ok(response) if response.status().is_success() => (HealthState::Healthy, None),
            Ok(response) => (
                HealthState::Error,
                Some(format!("health returned HTTP {}", response.status())),
            ),
            Err(e) if e.is_connect() => (HealthState::Offline, Some(e.to_string())),
            Err(e) => (HealthState::Error, Some(e.to_string())),
        };

        debug!(
            "Health probe {}: {:?} in {}ms",
            analyzer.id, status, response_time_ms
        );

        HealthReport {
            service: analyzer.id.clone(),
            name: analyzer.name.clone(),
            status,
            response_time_ms,
            last_check: unix_now(),
            error,
        }
    }
}

/// Probe every analyzer concurrently, reporting in roster order
pub async fn probe_roster(clients: &[AnalyzerClient]) -> Vec<HealthReport> {
    let mut handles = Vec::with_capacity(clients.len());
    for client in clients {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.probe_health().await }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (handle, client) in handles.into_iter().zip(clients) {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => reports.push(HealthReport {
                service: client.analyzer().id.clone(),
                name: client.analyzer().name.clone(),
                status: HealthState::Error,
                response_time_ms: 0,
                last_check: unix_now(),
                error: Some(format!("probe task failed: {e}")),
            }),
        }
    }
    reports
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use emoji_vision_common::{Analyzer, AnalyzerCategory};
    use std::path::PathBuf;

    fn dead_client() -> AnalyzerClient {
        // Port 1 is never listening
        let analyzer = Analyzer {
            id: "yolo".to_string(),
            name: "YOLO".to_string(),
            host: "localhost".to_string(),
            port: 1,
            endpoint: "/v3/analyze".to_string(),
            optimal_size: None,
            category: AnalyzerCategory::Spatial,
        };
        AnalyzerClient::new(analyzer, Duration::from_secs(1), 0, PathBuf::from(".")).unwrap()
    }

    #[tokio::test]
    async fn test_probe_unreachable_analyzer() {
        let report = dead_client().probe_health().await;
        assert_eq!(report.service, "yolo");
        assert!(matches!(
            report.status,
            HealthState::Offline | HealthState::Error
        ));
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_roster_keeps_order() {
        let clients = vec![dead_client(), dead_client()];
        let reports = probe_roster(&clients).await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.service == "yolo"));
    }
}
