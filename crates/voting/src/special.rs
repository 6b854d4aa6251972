//! Out-of-competition special detections
//!
//! Text, face and NSFW findings are reported alongside the consensus, not
//! inside it: they are sidecars that callers read regardless of how the
//! vote went.

use emoji_vision_common::{emoji, AnalysisResult, PredictionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One special detection sidecar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialDetection {
    /// Whether the signal was present
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Extracted text content, for the text sidecar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Pose indicator, for the face sidecar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<String>,
}

impl SpecialDetection {
    fn absent() -> Self {
        Self::default()
    }
}

/// The three sidecars reported with every response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialDetections {
    pub text: SpecialDetection,
    pub face: SpecialDetection,
    pub nsfw: SpecialDetection,
}

/// Extract the special detection sidecars from all analyzer results
#[must_use]
pub fn extract_special(results: &BTreeMap<String, AnalysisResult>) -> SpecialDetections {
    let mut special = SpecialDetections {
        text: SpecialDetection::absent(),
        face: SpecialDetection::absent(),
        nsfw: SpecialDetection::absent(),
    };

    for result in results.values() {
        if !result.ok {
            continue;
        }
        for prediction in &result.predictions {
            match prediction.kind {
                PredictionKind::TextExtraction => {
                    if !special.text.detected && prediction.bool_property("has_text") {
                        special.text = SpecialDetection {
                            detected: true,
                            emoji: Some(emoji::TEXT.to_string()),
                            confidence: prediction.confidence,
                            content: prediction.text.clone(),
                            pose: None,
                        };
                    }
                }
                PredictionKind::FaceDetection => {
                    let is_face_emoji = prediction
                        .emoji
                        .as_deref()
                        .is_some_and(|e| emoji::eq(e, emoji::FACE));
                    if !special.face.detected && is_face_emoji {
                        special.face = SpecialDetection {
                            detected: true,
                            emoji: Some(emoji::FACE.to_string()),
                            confidence: prediction.confidence,
                            content: None,
                            pose: prediction
                                .properties
                                .get("pose")
                                .and_then(serde_json::Value::as_str)
                                .map(str::to_string),
                        };
                    }
                }
                PredictionKind::ContentModeration => {
                    let is_nsfw_emoji = prediction
                        .emoji
                        .as_deref()
                        .is_some_and(|e| emoji::eq(e, emoji::NSFW));
                    if !special.nsfw.detected && is_nsfw_emoji {
                        special.nsfw = SpecialDetection {
                            detected: true,
                            emoji: Some(emoji::NSFW.to_string()),
                            confidence: prediction.confidence,
                            content: None,
                            pose: None,
                        };
                    }
                }
                _ => {}
            }
        }
    }

    special
}

#[cfg(test)]
mod tests {
    use super::*;
    use emoji_vision_common::{Prediction, ResultMetadata};

    fn results_with(preds: Vec<Prediction>) -> BTreeMap<String, AnalysisResult> {
        [(
            "svc".to_string(),
            AnalysisResult::success(preds, ResultMetadata::default()),
        )]
        .into()
    }

    #[test]
    fn test_text_detected_only_with_has_text() {
        let mut with_text = Prediction::new(PredictionKind::TextExtraction);
        with_text.text = Some("STOP".to_string());
        with_text.confidence = Some(0.98);
        with_text
            .properties
            .insert("has_text".to_string(), serde_json::Value::Bool(true));

        let special = extract_special(&results_with(vec![with_text]));
        assert!(special.text.detected);
        assert_eq!(special.text.content.as_deref(), Some("STOP"));
        assert_eq!(special.text.emoji.as_deref(), Some(emoji::TEXT));

        let mut without = Prediction::new(PredictionKind::TextExtraction);
        without.text = Some(String::new());
        let special = extract_special(&results_with(vec![without]));
        assert!(!special.text.detected);
    }

    #[test]
    fn test_face_detected_with_pose() {
        let mut face = Prediction::new(PredictionKind::FaceDetection);
        face.emoji = Some(emoji::FACE.to_string());
        face.confidence = Some(0.91);
        face.properties.insert(
            "pose".to_string(),
            serde_json::Value::String("frontal".to_string()),
        );

        let special = extract_special(&results_with(vec![face]));
        assert!(special.face.detected);
        assert_eq!(special.face.pose.as_deref(), Some("frontal"));
    }

    #[test]
    fn test_nsfw_detected() {
        let mut nsfw = Prediction::new(PredictionKind::ContentModeration);
        nsfw.emoji = Some(emoji::NSFW.to_string());
        nsfw.confidence = Some(0.9);

        let special = extract_special(&results_with(vec![nsfw]));
        assert!(special.nsfw.detected);
        assert_eq!(special.nsfw.confidence, Some(0.9));
    }

    #[test]
    fn test_moderation_without_nsfw_emoji_is_clean() {
        // A clean verdict carries no emoji
        let clean = Prediction::new(PredictionKind::ContentModeration);
        let special = extract_special(&results_with(vec![clean]));
        assert!(!special.nsfw.detected);
    }

    #[test]
    fn test_empty_results_report_nothing() {
        let special = extract_special(&BTreeMap::new());
        assert_eq!(
            special,
            SpecialDetections {
                text: SpecialDetection::default(),
                face: SpecialDetection::default(),
                nsfw: SpecialDetection::default(),
            }
        );
    }
}
