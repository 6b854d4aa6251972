//! Caption aggregation
//!
//! The caption analyzers (BLIP, Ollama) each describe the whole image in a
//! sentence. This crate picks the first caption per analyzer, optionally
//! scores each against the image through the similarity endpoint, counts
//! meaningful words, and orders the records so the best-grounded, tersest
//! caption comes first.
//!
//! Similarity scoring is best-effort: a failed scoring call leaves
//! `clip_similarity` null and the caption is still emitted.

use emoji_vision_common::{AnalysisResult, Analyzer, AnalyzerRoster, PredictionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Words that carry no descriptive weight in a caption
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "on", "in", "at", "to", "from", "by", "with", "for",
    "is", "are", "was", "were", "be", "been", "being", "it", "its", "this", "that", "there",
    "here", "his", "her", "their", "some", "very",
];

/// One emitted caption record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionRecord {
    /// Caption analyzer id
    pub service: String,
    /// The caption text as produced
    pub original: String,
    /// Meaningful word count (stopwords excluded)
    pub words: usize,
    /// Caption-to-image similarity, null when scoring was unavailable
    pub clip_similarity: Option<f64>,
}

/// Image reference handed to the similarity endpoint
#[derive(Debug, Clone, Copy)]
pub enum ScoreSource<'a> {
    /// Image reachable over HTTP
    Url(&'a str),
    /// Image on the local filesystem
    File(&'a str),
}

/// Client for the similarity endpoint hosted by the CLIP analyzer
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    http: reqwest::Client,
    score_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ScoreEnvelope {
    status: String,
    #[serde(default)]
    similarity_score: Option<f64>,
}

impl SimilarityScorer {
    /// Build a scorer against the given analyzer's host
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(analyzer: &Analyzer, timeout: Duration) -> Result<Self, ScoreError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| ScoreError::Build(e.to_string()))?;
        Ok(Self {
            http,
            score_url: format!("http://{}:{}/v3/score", analyzer.host, analyzer.port),
            timeout,
        })
    }

    /// Score one caption against the image
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, non-success payloads, or a
    /// score outside `[0, 1]`.
    pub async fn score(&self, source: ScoreSource<'_>, caption: &str) -> Result<f64, ScoreError> {
        let (key, value) = match source {
            ScoreSource::Url(url) => ("url", url),
            ScoreSource::File(path) => ("file", path),
        };
        let response = self
            .http
            .get(&self.score_url)
            .query(&[(key, value), ("caption", caption)])
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ScoreError::Transport(e.to_string()))?;

        let envelope: ScoreEnvelope = response
            .json()
            .await
            .map_err(|e| ScoreError::Protocol(e.to_string()))?;

        if envelope.status != "success" {
            return Err(ScoreError::Service(envelope.status));
        }
        match envelope.similarity_score {
            Some(score) if (0.0..=1.0).contains(&score) => Ok(score),
            Some(score) => Err(ScoreError::Protocol(format!(
                "similarity score {score} out of range"
            ))),
            None => Err(ScoreError::Protocol("missing similarity_score".to_string())),
        }
    }
}

/// Similarity scoring errors
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("Failed to build HTTP client: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Scoring service reported status '{0}'")]
    Service(String),
}

/// Collect and order caption records from the analyzer results
///
/// One record per caption analyzer that produced a caption, ordered by
/// higher similarity first, then fewer meaningful words. Unscored captions
/// sort after scored ones.
pub async fn collect_captions(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &AnalyzerRoster,
    scorer: Option<&SimilarityScorer>,
    source: ScoreSource<'_>,
) -> Vec<CaptionRecord> {
    let mut records = Vec::new();

    for analyzer in roster.caption_analyzers() {
        let Some(result) = results.get(&analyzer.id) else {
            continue;
        };
        if !result.ok {
            continue;
        }
        let Some(text) = result.predictions.iter().find_map(|p| {
            matches!(p.kind, PredictionKind::Caption { .. })
                .then(|| p.text.clone())
                .flatten()
        }) else {
            continue;
        };

        let clip_similarity = match scorer {
            Some(scorer) => match scorer.score(source, &text).await {
                Ok(score) => Some(score),
                Err(e) => {
                    warn!("Similarity scoring failed for {}: {e}", analyzer.id);
                    None
                }
            },
            None => None,
        };

        let words = meaningful_word_count(&text);
        debug!(
            "Caption from {}: {} meaningful words, similarity {:?}",
            analyzer.id, words, clip_similarity
        );
        records.push(CaptionRecord {
            service: analyzer.id.clone(),
            original: text,
            words,
            clip_similarity,
        });
    }

    sort_records(&mut records);
    records
}

/// Order records: higher similarity first, then fewer meaningful words;
/// unscored captions sort last
fn sort_records(records: &mut [CaptionRecord]) {
    records.sort_by(|a, b| {
        let sim_a = a.clip_similarity.unwrap_or(-1.0);
        let sim_b = b.clip_similarity.unwrap_or(-1.0);
        sim_b
            .partial_cmp(&sim_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.words.cmp(&b.words))
    });
}

/// Count the words of a caption that actually describe something
#[must_use]
pub fn meaningful_word_count(caption: &str) -> usize {
    caption
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .count()
}
