//! Analyzer wire contract
//!
//! Every analyzer responds with the same envelope:
//! `{service, status, predictions[], metadata{}, error?}`. Individual
//! predictions carrying an unknown `type` tag are rejected and skipped with
//! a warning; a body that is not the envelope at all is a protocol error.

use emoji_vision_common::{AnalysisResult, ErrorKind, Prediction, ResultMetadata};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    service: Option<String>,
    status: String,
    #[serde(default)]
    predictions: Vec<serde_json::Value>,
    #[serde(default)]
    metadata: ResultMetadata,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parse one analyzer response body
///
/// `Ok` carries the final [`AnalysisResult`], which may itself be a service
/// failure; `Err` carries a protocol-level description for a body that does
/// not match the envelope.
pub fn parse_response(analyzer_id: &str, body: &[u8]) -> Result<AnalysisResult, String> {
    let envelope: WireEnvelope =
        serde_json::from_slice(body).map_err(|e| format!("invalid response body: {e}"))?;

    if let Some(service) = &envelope.service {
        if service != analyzer_id {
            warn!(
                "Analyzer {} responded as '{}', keeping configured id",
                analyzer_id, service
            );
        }
    }

    match envelope.status.as_str() {
        "success" => {
            let mut predictions = Vec::with_capacity(envelope.predictions.len());
            for raw in envelope.predictions {
                match serde_json::from_value::<Prediction>(raw) {
                    Ok(prediction) => predictions.push(prediction),
                    Err(e) => {
                        warn!("Analyzer {} sent unknown prediction, skipped: {e}", analyzer_id);
                    }
                }
            }
            Ok(AnalysisResult::success(predictions, envelope.metadata))
        }
        "error" => {
            let message = envelope
                .error
                .and_then(|e| match (e.code, e.message) {
                    (Some(code), Some(message)) => Some(format!("{code}: {message}")),
                    (None, Some(message)) => Some(message),
                    (Some(code), None) => Some(code),
                    (None, None) => None,
                })
                .unwrap_or_else(|| "analyzer reported an error".to_string());
            Ok(AnalysisResult::failure(ErrorKind::Service, message))
        }
        other => Err(format!("unknown status '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emoji_vision_common::PredictionKind;

    const CAT: &str = "\u{1F431}";

    #[test]
    fn test_parse_success() {
        let body = format!(
            r#"{{
                "service": "yolo",
                "status": "success",
                "predictions": [
                    {{"type": "object_detection", "label": "cat", "emoji": "{CAT}",
                     "confidence": 0.9, "bbox": {{"x": 0, "y": 0, "width": 100, "height": 100}}}}
                ],
                "metadata": {{"processing_time": 0.125}}
            }}"#
        );
        let result = parse_response("yolo", body.as_bytes()).unwrap();
        assert!(result.ok);
        assert_eq!(result.predictions.len(), 1);
        assert_eq!(result.predictions[0].kind, PredictionKind::ObjectDetection);
        assert_eq!(result.metadata.processing_time, Some(0.125));
    }

    #[test]
    fn test_parse_service_error() {
        let body = br#"{
            "service": "yolo",
            "status": "error",
            "predictions": [],
            "metadata": {},
            "error": {"code": "MODEL_LOAD", "message": "weights missing"}
        }"#;
        let result = parse_response("yolo", body).unwrap();
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Service));
        assert!(result.error_message.as_deref().unwrap().contains("MODEL_LOAD"));
    }

    #[test]
    fn test_parse_unknown_prediction_skipped() {
        let body = br#"{
            "status": "success",
            "predictions": [
                {"type": "telepathy", "confidence": 1.0},
                {"type": "classification", "label": "tabby", "confidence": 0.8}
            ],
            "metadata": {}
        }"#;
        let result = parse_response("clip", body).unwrap();
        assert!(result.ok);
        assert_eq!(result.predictions.len(), 1);
        assert_eq!(result.predictions[0].label.as_deref(), Some("tabby"));
    }

    #[test]
    fn test_parse_garbage_is_protocol_error() {
        assert!(parse_response("yolo", b"<html>502</html>").is_err());
        assert!(parse_response("yolo", br#"{"status": "maybe"}"#).is_err());
    }

    #[test]
    fn test_parse_processing_dimensions() {
        let body = br#"{
            "status": "success",
            "predictions": [],
            "metadata": {"processing_time": 0.05,
                         "processing_dimensions": {"width": 640, "height": 640}}
        }"#;
        let result = parse_response("yolo", body).unwrap();
        let dims = result.metadata.processing_dimensions.unwrap();
        assert_eq!((dims.width, dims.height), (640, 640));
    }
}
