//! Configuration loading
//!
//! The full configuration is a JSON file (`server` block plus `analyzers`
//! array). When no file is given, a built-in default roster of the standard
//! analyzers is used; every host and port falls back to environment
//! variables (`YOLO_HOST`, `BLIP_PORT`, ...) so a deployment can be wired up
//! without writing a file at all.

use crate::analyzer::{Analyzer, AnalyzerCategory, AnalyzerRoster};
use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the API server listens on
    pub port: u16,
    /// Directory uploaded and downloaded images are stored in
    pub upload_dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_file_size: u64,
    /// Per-analyzer-call deadline in seconds
    pub analyzer_timeout_secs: u64,
    /// Maximum transport-level retries per analyzer call
    pub max_retries: u32,
    /// Public URL prefix analyzers use to fetch locally stored images
    pub public_base_url: String,
    /// Root directory for pre-sized image variants
    pub image_root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: std::env::var("EMOJI_VISION_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            upload_dir: std::env::var("EMOJI_VISION_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            max_file_size: std::env::var("EMOJI_VISION_MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024),
            analyzer_timeout_secs: std::env::var("EMOJI_VISION_ANALYZER_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            max_retries: std::env::var("EMOJI_VISION_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            public_base_url: std::env::var("EMOJI_VISION_PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            image_root: std::env::var("EMOJI_VISION_IMAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Analyzer roster in priority order
    #[serde(default = "default_analyzers")]
    pub analyzers: Vec<Analyzer>,
}

impl AppConfig {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or fails to parse; a broken
    /// configuration fails startup rather than limping along.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: AppConfig = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// Load from the `EMOJI_VISION_CONFIG` file when set, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if a configured file is missing or unparsable.
    pub fn from_env() -> Result<Self> {
        match std::env::var("EMOJI_VISION_CONFIG") {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => Ok(Self {
                server: ServerConfig::default(),
                analyzers: default_analyzers(),
            }),
        }
    }

    /// Build the immutable roster from this configuration
    #[must_use]
    pub fn roster(&self) -> AnalyzerRoster {
        AnalyzerRoster::new(self.analyzers.clone())
    }
}

fn env_host(id: &str, fallback: &str) -> String {
    std::env::var(format!("{}_HOST", id.to_uppercase())).unwrap_or_else(|_| fallback.to_string())
}

fn env_port(id: &str, fallback: u16) -> u16 {
    std::env::var(format!("{}_PORT", id.to_uppercase()))
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(fallback)
}

fn analyzer(
    id: &str,
    name: &str,
    port: u16,
    optimal_size: Option<&str>,
    category: AnalyzerCategory,
) -> Analyzer {
    Analyzer {
        id: id.to_string(),
        name: name.to_string(),
        host: env_host(id, "localhost"),
        port: env_port(id, port),
        endpoint: "/v3/analyze".to_string(),
        optimal_size: optimal_size.map(str::to_string),
        category,
    }
}

/// The standard deployment roster
#[must_use]
pub fn default_analyzers() -> Vec<Analyzer> {
    use AnalyzerCategory::{Other, Semantic, Spatial, Specialized};
    vec![
        analyzer("yolo", "YOLO", 7770, Some("640x640"), Spatial),
        analyzer("detectron2", "Detectron2", 7771, None, Spatial),
        analyzer("rtdetr", "RT-DETR", 7772, Some("640x640"), Spatial),
        analyzer("inception", "Inception", 7773, Some("299x299"), Spatial),
        analyzer("clip", "CLIP", 7774, Some("224x224"), Spatial),
        analyzer("blip", "BLIP", 7775, Some("384x384"), Semantic),
        analyzer("ollama", "Ollama", 7776, None, Semantic),
        analyzer("face", "Face", 7777, None, Specialized),
        analyzer("nsfw", "NSFW", 7778, None, Specialized),
        analyzer("ocr", "OCR", 7779, None, Specialized),
        analyzer("colors", "Colors", 7780, None, Other),
        analyzer("metadata", "Metadata", 7781, None, Other),
    ]
}
