//! Unified analyzer response model
//!
//! Every analyzer, whatever it detects, reports through the same shapes:
//! an [`AnalysisResult`] wrapping an ordered list of [`Prediction`]s. The
//! prediction payload is a tagged variant keyed by `type`; unknown tags are
//! rejected at deserialization time so a misbehaving analyzer surfaces as a
//! protocol error instead of silently dropping data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned bounding box in integer pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X coordinate of the top-left corner
    pub x: i32,
    /// Y coordinate of the top-left corner
    pub y: i32,
    /// Box width in pixels
    pub width: i32,
    /// Box height in pixels
    pub height: i32,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get area of the bounding box in square pixels
    #[must_use]
    #[inline]
    pub fn area(&self) -> i64 {
        i64::from(self.width.max(0)) * i64::from(self.height.max(0))
    }

    /// Calculate Intersection over Union (`IoU`) with another box
    #[must_use]
    #[inline]
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection_width = i64::from((x2 - x1).max(0));
        let intersection_height = i64::from((y2 - y1).max(0));
        let intersection_area = intersection_width * intersection_height;

        let union_area = self.area() + other.area() - intersection_area;

        if union_area > 0 {
            intersection_area as f64 / union_area as f64
        } else {
            0.0
        }
    }

    /// Axis-aligned union of this box and another
    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        BoundingBox::new(x1, y1, x2 - x1, y2 - y1)
    }
}

/// One word-to-emoji mapping attached to a caption prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiMapping {
    /// The caption word that produced the mapping
    pub word: String,
    /// The mapped emoji
    pub emoji: String,
    /// Rare-find marker propagated to the consensus entry
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shiny: bool,
}

/// Prediction payload, tagged by the `type` field on the wire
///
/// Unit variants carry no extra payload; type-specific fields live on the
/// variant itself. Deserializing an unknown tag fails, which the analyzer
/// client reports as a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredictionKind {
    ObjectDetection,
    Classification,
    Caption {
        /// Ordered word-to-emoji mappings derived from the caption text
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        emoji_mappings: Vec<EmojiMapping>,
    },
    ColorAnalysis,
    FaceDetection,
    ContentModeration,
    TextExtraction,
    MetadataExtraction,
}

impl PredictionKind {
    /// Wire name of the prediction type
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ObjectDetection => "object_detection",
            Self::Classification => "classification",
            Self::Caption { .. } => "caption",
            Self::ColorAnalysis => "color_analysis",
            Self::FaceDetection => "face_detection",
            Self::ContentModeration => "content_moderation",
            Self::TextExtraction => "text_extraction",
            Self::MetadataExtraction => "metadata_extraction",
        }
    }

    /// Whether this prediction type may legitimately carry a bounding box
    #[must_use]
    pub fn is_spatial(&self) -> bool {
        matches!(self, Self::ObjectDetection | Self::FaceDetection)
    }
}

/// A single analyzer prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Type tag plus type-specific payload
    #[serde(flatten)]
    pub kind: PredictionKind,
    /// Human-readable label (e.g. COCO class name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Emoji assigned by the analyzer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Confidence score (0.0-1.0); absent for metadata-style predictions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Bounding box in the analyzer's working coordinate space
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// Free text (captions, extracted text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Type-specific properties passed through verbatim
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Prediction {
    /// Create a bare prediction of the given kind
    #[must_use]
    pub fn new(kind: PredictionKind) -> Self {
        Self {
            kind,
            label: None,
            emoji: None,
            confidence: None,
            bbox: None,
            text: None,
            properties: serde_json::Map::new(),
        }
    }

    /// The caption's emoji mappings, empty for non-caption predictions
    #[must_use]
    pub fn emoji_mappings(&self) -> &[EmojiMapping] {
        match &self.kind {
            PredictionKind::Caption { emoji_mappings } => emoji_mappings,
            _ => &[],
        }
    }

    /// Look up a boolean property (e.g. `has_text` on text extraction)
    #[must_use]
    pub fn bool_property(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Error kinds surfaced by the analyzer client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Connection refused or DNS failure
    Offline,
    /// Deadline expired or the read was reset
    Timeout,
    /// Malformed response or missing required fields
    Protocol,
    /// The analyzer returned a `status == "error"` payload
    Service,
}

/// Analyzer-reported metadata for one analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Wall-clock processing time reported by the analyzer, in seconds
    #[serde(
        default,
        alias = "processing_time_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub processing_time: Option<f64>,
    /// The resolution the analyzer actually processed, when it differs from
    /// the original image (drives coordinate rescaling)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_dimensions: Option<Dimensions>,
    /// Anything else the analyzer reported
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Per-analyzer outcome for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Whether the analyzer reported success
    pub ok: bool,
    /// Ordered predictions; always empty when `ok` is false
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    /// Analyzer-reported metadata
    #[serde(default)]
    pub metadata: ResultMetadata,
    /// Failure classification when `ok` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Failure detail when `ok` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AnalysisResult {
    /// Successful analysis with the given predictions
    #[must_use]
    pub fn success(predictions: Vec<Prediction>, metadata: ResultMetadata) -> Self {
        Self {
            ok: true,
            predictions,
            metadata,
            error_kind: None,
            error_message: None,
        }
    }

    /// Failed analysis; predictions are always dropped on failure
    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            predictions: Vec::new(),
            metadata: ResultMetadata::default(),
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }
}

/// Per-service call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Success,
    Timeout,
    Offline,
    Error,
}

/// Status of one analyzer call within a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Analyzer id
    pub service: String,
    /// Call outcome
    pub status: ServiceState,
    /// Wall-clock time of the call in milliseconds
    pub processing_time_ms: u64,
    /// Number of predictions returned
    pub prediction_count: usize,
    /// Error detail for non-success outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
