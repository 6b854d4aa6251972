//! HTTP client for one external analyzer
//!
//! Each [`AnalyzerClient`] wraps a single analyzer endpoint and exposes the
//! two operations the orchestrator needs: analyze-by-URL and
//! analyze-by-file. Both issue one `GET <endpoint>?url=...|file=...` and
//! parse the unified response envelope.
//!
//! Failures are data, not errors: every call returns an
//! [`AnalysisResult`], with `ok = false` and a classified
//! [`ErrorKind`] when the analyzer could not be reached, timed out, spoke a
//! broken protocol, or reported its own error payload. Transport failures
//! are retried a bounded number of times with a fixed backoff; a response
//! with `status == "error"` is never retried.

mod health;
mod wire;

pub use health::{probe_roster, HealthReport, HealthState};

use emoji_vision_common::{AnalysisResult, Analyzer, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fixed delay between transport-level retries
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// HTTP client bound to one analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerClient {
    analyzer: Analyzer,
    http: reqwest::Client,
    /// Per-attempt deadline covering connect, send and receive
    timeout: Duration,
    /// Maximum transport-level retries after the first attempt
    max_retries: u32,
    /// Root directory for pre-sized image variants
    image_root: PathBuf,
}

impl AnalyzerClient {
    /// Create a client for one analyzer
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        analyzer: Analyzer,
        timeout: Duration,
        max_retries: u32,
        image_root: PathBuf,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self {
            analyzer,
            http,
            timeout,
            max_retries,
            image_root,
        })
    }

    /// The analyzer this client talks to
    #[must_use]
    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Shared connection pool, reused by the health probe
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Analyze an image reachable by URL
    pub async fn analyze_url(&self, url: &str, deadline: Instant) -> AnalysisResult {
        self.request(("url", url.to_string()), deadline).await
    }

    /// Analyze an image by local file path
    ///
    /// When the analyzer prefers a smaller working resolution, a pre-sized
    /// sibling under `<image_root>/variants/<size>/` is used if it exists.
    pub async fn analyze_file(&self, path: &Path, deadline: Instant) -> AnalysisResult {
        let resolved = self.resolve_variant(path);
        self.request(("file", resolved.to_string_lossy().into_owned()), deadline)
            .await
    }

    /// Issue the request with bounded retries
    ///
    /// Retries apply only to transport failures (connect refused, timeout).
    /// A parsed response, even an error payload, is final. Retries never
    /// extend past `deadline`; once less than backoff-plus-one-second
    /// remains, the last classified failure is returned as-is.
    async fn request(&self, param: (&str, String), deadline: Instant) -> AnalysisResult {
        let mut attempt: u32 = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return AnalysisResult::failure(ErrorKind::Timeout, "deadline expired");
            }

            let per_attempt = remaining.min(self.timeout);
            match self.attempt(&param, per_attempt).await {
                Ok(result) => return result,
                Err((kind, message)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let can_retry = attempt < self.max_retries
                        && remaining > RETRY_BACKOFF + Duration::from_secs(1);
                    if !can_retry {
                        return AnalysisResult::failure(kind, message);
                    }
                    attempt += 1;
                    warn!(
                        "Analyzer {} transport failure (attempt {}/{}): {}",
                        self.analyzer.id,
                        attempt,
                        self.max_retries + 1,
                        message
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// One request attempt
    ///
    /// `Err` means a retryable transport failure; `Ok` carries the final
    /// result, including non-retryable protocol and service failures.
    async fn attempt(
        &self,
        param: &(&str, String),
        timeout: Duration,
    ) -> Result<AnalysisResult, (ErrorKind, String)> {
        let url = self.analyzer.analysis_url();
        debug!(
            "GET {} ?{}={} (timeout {:?})",
            url, param.0, param.1, timeout
        );

        let response = self
            .http
            .get(&url)
            .query(&[param])
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify_transport)?;

        match wire::parse_response(&self.analyzer.id, &body) {
            Ok(result) => Ok(result),
            Err(message) => Ok(AnalysisResult::failure(
                ErrorKind::Protocol,
                format!("HTTP {status}: {message}"),
            )),
        }
    }

    /// Resolve the optimal-size variant path for a local file
    ///
    /// Read-only probe over a deterministic candidate list; a missing
    /// variant is not an error, the original path is used instead.
    fn resolve_variant(&self, path: &Path) -> PathBuf {
        let Some(size) = self.analyzer.optimal_size.as_deref() else {
            return path.to_path_buf();
        };
        if size == "original" {
            return path.to_path_buf();
        }
        let variants = self.image_root.join("variants").join(size);
        let mut candidates = Vec::with_capacity(2);
        if let Some(stem) = path.file_stem() {
            let mut jpg = stem.to_os_string();
            jpg.push(".jpg");
            candidates.push(variants.join(jpg));
        }
        if let Some(name) = path.file_name() {
            candidates.push(variants.join(name));
        }
        for candidate in candidates {
            if candidate.exists() {
                debug!(
                    "Analyzer {} using {} variant: {}",
                    self.analyzer.id,
                    size,
                    candidate.display()
                );
                return candidate;
            }
        }
        path.to_path_buf()
    }
}

/// Map a reqwest failure onto the wire error taxonomy
fn classify_transport(err: reqwest::Error) -> (ErrorKind, String) {
    if err.is_timeout() {
        (ErrorKind::Timeout, err.to_string())
    } else if err.is_connect() {
        (ErrorKind::Offline, err.to_string())
    } else if err.is_body() || err.is_decode() {
        // A reset mid-body reads the same as a deadline to the caller
        (ErrorKind::Timeout, err.to_string())
    } else {
        (ErrorKind::Offline, err.to_string())
    }
}

/// Client construction errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use emoji_vision_common::AnalyzerCategory;

    fn analyzer(optimal_size: Option<&str>) -> Analyzer {
        Analyzer {
            id: "yolo".to_string(),
            name: "YOLO".to_string(),
            host: "localhost".to_string(),
            port: 7770,
            endpoint: "/v3/analyze".to_string(),
            optimal_size: optimal_size.map(str::to_string),
            category: AnalyzerCategory::Spatial,
        }
    }

    fn client(optimal_size: Option<&str>, image_root: &Path) -> AnalyzerClient {
        AnalyzerClient::new(
            analyzer(optimal_size),
            Duration::from_secs(15),
            2,
            image_root.to_path_buf(),
        )
        .unwrap()
    }

    #[test]
    fn test_variant_resolution_prefers_existing_variant() {
        let root = std::env::temp_dir().join("emoji-vision-variant-test");
        let variants = root.join("variants").join("640x640");
        std::fs::create_dir_all(&variants).unwrap();
        std::fs::write(variants.join("photo.jpg"), b"jpeg").unwrap();

        let client = client(Some("640x640"), &root);
        let resolved = client.resolve_variant(Path::new("/data/images/photo.png"));
        assert_eq!(resolved, variants.join("photo.jpg"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_variant_resolution_falls_back_to_original() {
        let root = std::env::temp_dir().join("emoji-vision-variant-missing");
        let client = client(Some("640x640"), &root);
        let original = Path::new("/data/images/photo.png");
        assert_eq!(client.resolve_variant(original), original);
    }

    #[test]
    fn test_variant_resolution_skipped_for_original_size() {
        let client = client(Some("original"), Path::new("."));
        let original = Path::new("/data/images/photo.png");
        assert_eq!(client.resolve_variant(original), original);
    }

    #[tokio::test]
    async fn test_unreachable_analyzer_is_offline() {
        // Port 1 is never listening
        let mut a = analyzer(None);
        a.port = 1;
        let client =
            AnalyzerClient::new(a, Duration::from_secs(1), 0, PathBuf::from(".")).unwrap();
        let result = client
            .analyze_url("http://example.com/cat.jpg", Instant::now() + Duration::from_secs(2))
            .await;
        assert!(!result.ok);
        assert!(matches!(
            result.error_kind,
            Some(ErrorKind::Offline) | Some(ErrorKind::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_expired_deadline_short_circuits() {
        let client = client(None, Path::new("."));
        let result = client
            .analyze_url("http://example.com/cat.jpg", Instant::now())
            .await;
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    }
}
