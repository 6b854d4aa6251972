//! Analyzer roster
//!
//! One [`Analyzer`] per external ML endpoint. The roster is built once at
//! startup from configuration and passed around as an immutable value; no
//! part of the pipeline mutates it after that.

use serde::{Deserialize, Serialize};

/// Evidence category an analyzer contributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerCategory {
    /// Object detectors and visual classifiers that ground emojis in pixels
    Spatial,
    /// Caption producers (scene understanding in words)
    Semantic,
    /// Single-purpose detectors: face, NSFW, OCR
    Specialized,
    /// Pure classification evidence; no analyzer ships in this category by
    /// default, set `category = "classification"` in config to activate
    Classification,
    /// Everything else (colors, metadata); never votes
    Other,
}

impl AnalyzerCategory {
    /// Whether analyzers in this category may return bounding boxes
    #[must_use]
    pub fn supports_spatial(&self) -> bool {
        matches!(self, Self::Spatial | Self::Specialized)
    }
}

/// One external ML analyzer endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    /// Stable lowercase tag, e.g. `yolo`, `blip`, `face`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Host the analyzer listens on
    pub host: String,
    /// Port the analyzer listens on
    pub port: u16,
    /// Analysis path, e.g. `/v3/analyze`
    pub endpoint: String,
    /// Preferred input resolution for variant path resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal_size: Option<String>,
    /// Evidence category
    pub category: AnalyzerCategory,
}

impl Analyzer {
    /// Base URL of the analyzer
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full analysis URL
    #[must_use]
    pub fn analysis_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.endpoint)
    }

    /// Health endpoint URL
    #[must_use]
    pub fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.host, self.port)
    }
}

/// Ordered, immutable set of analyzers for this deployment
///
/// Iteration order is configuration order; vote extraction depends on it for
/// reproducible tie resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerRoster {
    analyzers: Vec<Analyzer>,
}

impl AnalyzerRoster {
    /// Build a roster from configured analyzers, preserving order
    #[must_use]
    pub fn new(analyzers: Vec<Analyzer>) -> Self {
        Self { analyzers }
    }

    /// Number of analyzers
    #[must_use]
    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    /// Whether the roster is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Iterate analyzers in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Analyzer> {
        self.analyzers.iter()
    }

    /// Look up an analyzer by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Analyzer> {
        self.analyzers.iter().find(|a| a.id == id)
    }

    /// Analyzers that produce captions (semantic category)
    pub fn caption_analyzers(&self) -> impl Iterator<Item = &Analyzer> {
        self.analyzers
            .iter()
            .filter(|a| a.category == AnalyzerCategory::Semantic)
    }
}
