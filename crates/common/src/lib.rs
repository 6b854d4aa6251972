//! Common types and utilities for the emoji vision pipeline
//!
//! Shared between the analyzer clients, the fan-out orchestrator, the
//! bounding-box clustering engine, the voting engine and the API server:
//! - The unified analyzer response model (`AnalysisResult`, `Prediction`)
//! - Bounding-box geometry (`BoundingBox`, `Dimensions`)
//! - The analyzer roster (`Analyzer`, `AnalyzerCategory`, `AnalyzerRoster`)
//! - Emoji constants and NFC normalization helpers
//! - Configuration loading with environment fallbacks

use thiserror::Error;

pub mod analysis;
pub mod analyzer;
pub mod config;
pub mod emoji;

pub use analysis::{
    AnalysisResult, BoundingBox, Dimensions, EmojiMapping, ErrorKind, Prediction, PredictionKind,
    ResultMetadata, ServiceState, ServiceStatus,
};
pub use analyzer::{Analyzer, AnalyzerCategory, AnalyzerRoster};
pub use config::{AppConfig, ServerConfig};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Image read error: {0}")]
    ImageRead(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
