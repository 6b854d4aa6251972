//! Bounding-box clustering engine
//!
//! Turns the raw per-analyzer detections for one image into grouped object
//! instances: detections from different analyzers that overlap enough are
//! inferred to describe the same physical object.
//!
//! The engine is a pure function from `{analyzer results, image dimensions}`
//! to `{grouped instances}`; the voting engine consumes its output, never
//! calls back into it.
//!
//! Pipeline per image:
//! 1. Extract bbox-bearing predictions from spatially capable analyzers
//! 2. Rescale every box into the original image's coordinate space
//! 3. Group by normalized key (`face` for face detections, NFC emoji else)
//! 4. Cluster within each group by IoU against the cluster anchor
//! 5. Deduplicate per-service members, drop low-confidence singletons
//! 6. Score and rank clusters, emit one instance per surviving cluster

use emoji_vision_common::{
    emoji, AnalysisResult, AnalyzerRoster, BoundingBox, Dimensions, PredictionKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Two boxes describe the same object when IoU strictly exceeds this
pub const IOU_THRESHOLD: f64 = 0.30;

/// A lone detection survives only at or above this confidence
pub const SINGLETON_CONFIDENCE: f64 = 0.85;

/// Group key for face detections, which cluster by kind rather than emoji
pub const FACE_KEY: &str = "face";

/// One bbox-bearing prediction after coordinate rescaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Analyzer that produced the detection
    pub service: String,
    /// Class label
    pub label: String,
    /// NFC-normalized emoji
    pub emoji: String,
    /// Wire prediction type (`object_detection` or `face_detection`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Detection confidence (0.0-1.0)
    pub confidence: f64,
    /// Box in the original image's coordinate space
    pub bbox: BoundingBox,
    /// Box exactly as the analyzer reported it
    pub original_bbox: BoundingBox,
}

/// Contribution of one service to an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDetection {
    /// Analyzer id
    pub service: String,
    /// That analyzer's confidence for this instance
    pub confidence: f64,
}

/// One physical object inferred from a cluster of detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// `<label>_<rank>`, rank 1-based by cluster score
    pub cluster_id: String,
    /// NFC-normalized emoji
    pub emoji: String,
    /// Class label
    pub label: String,
    /// Axis-aligned union of every member box
    pub merged_bbox: BoundingBox,
    /// Number of member detections
    pub detection_count: usize,
    /// Mean member confidence, rounded to 3 decimals
    pub avg_confidence: f64,
    /// Per-service contributions
    pub detections: Vec<InstanceDetection>,
}

/// All surviving detections and instances for one emoji (or `face`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedEmoji {
    /// Class label of the first detection in the group
    pub label: String,
    /// NFC-normalized emoji
    pub emoji: String,
    /// Wire prediction type of the group
    #[serde(rename = "type")]
    pub kind: String,
    /// Surviving detections after dedup and singleton filtering
    pub detections: Vec<Detection>,
    /// Ranked instances
    pub instances: Vec<Instance>,
}

/// Output of the clustering engine for one image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutput {
    /// Grouped instances keyed by normalized group key
    pub groups: BTreeMap<String, GroupedEmoji>,
    /// Flat list of all surviving detections across groups
    pub all_detections: Vec<Detection>,
}

/// Cluster all spatial detections for one image
///
/// `results` is consulted in roster order so output is independent of
/// analyzer completion order. `dimensions` is the original image size;
/// when absent, rescaling is the identity.
#[must_use]
pub fn cluster_detections(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &AnalyzerRoster,
    dimensions: Option<Dimensions>,
) -> ClusterOutput {
    let detections = extract_detections(results, roster, dimensions);
    debug!("Extracted {} spatial detections", detections.len());

    // Group by normalized key, preserving extraction order within groups
    let mut grouped: BTreeMap<String, Vec<Detection>> = BTreeMap::new();
    for detection in detections {
        let key = group_key(&detection);
        grouped.entry(key).or_default().push(detection);
    }

    let mut groups = BTreeMap::new();
    let mut all_detections = Vec::new();
    for (key, members) in grouped {
        let clusters = cluster_group(&members);
        let cleaned = clean_clusters(&key, &members, clusters);
        if cleaned.is_empty() {
            continue;
        }

        let label = members[0].label.clone();
        let group_emoji = members[0].emoji.clone();
        let kind = members[0].kind.clone();
        let instances = emit_instances(&label, &group_emoji, &members, &cleaned);

        let mut surviving = Vec::with_capacity(cleaned.iter().map(Vec::len).sum());
        for cluster in &cleaned {
            surviving.extend(cluster.iter().map(|&i| members[i].clone()));
        }
        all_detections.extend(surviving.iter().cloned());

        groups.insert(
            key,
            GroupedEmoji {
                label,
                emoji: group_emoji,
                kind,
                detections: surviving,
                instances,
            },
        );
    }

    ClusterOutput {
        groups,
        all_detections,
    }
}

/// Pull every bbox-bearing prediction out of the result map
fn extract_detections(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &AnalyzerRoster,
    dimensions: Option<Dimensions>,
) -> Vec<Detection> {
    let mut detections = Vec::new();
    for analyzer in roster.iter() {
        if !analyzer.category.supports_spatial() {
            continue;
        }
        let Some(result) = results.get(&analyzer.id) else {
            continue;
        };
        if !result.ok {
            continue;
        }

        let scale = rescale_factors(result.metadata.processing_dimensions, dimensions);
        for prediction in &result.predictions {
            if !prediction.kind.is_spatial() {
                continue;
            }
            let Some(bbox) = prediction.bbox else {
                continue;
            };
            let is_face = matches!(prediction.kind, PredictionKind::FaceDetection);
            let raw_emoji = match (&prediction.emoji, is_face) {
                (Some(e), _) => e.clone(),
                (None, true) => emoji::FACE.to_string(),
                // An emoji-less object detection has nothing to vote for
                (None, false) => continue,
            };
            let label = prediction
                .label
                .clone()
                .unwrap_or_else(|| if is_face { FACE_KEY.to_string() } else { raw_emoji.clone() });

            detections.push(Detection {
                service: analyzer.id.clone(),
                label,
                emoji: emoji::nfc(&raw_emoji),
                kind: prediction.kind.name().to_string(),
                confidence: prediction.confidence.unwrap_or(0.0),
                bbox: apply_scale(bbox, scale),
                original_bbox: bbox,
            });
        }
    }
    detections
}

/// Per-axis scale from the analyzer's working space to the display space
///
/// Identity unless the analyzer reported its own processing dimensions and
/// the original dimensions are known.
fn rescale_factors(
    processing: Option<Dimensions>,
    display: Option<Dimensions>,
) -> Option<(f64, f64)> {
    let (processing, display) = (processing?, display?);
    if processing == display || processing.width == 0 || processing.height == 0 {
        return None;
    }
    Some((
        f64::from(display.width) / f64::from(processing.width),
        f64::from(display.height) / f64::from(processing.height),
    ))
}

fn apply_scale(bbox: BoundingBox, scale: Option<(f64, f64)>) -> BoundingBox {
    let Some((sx, sy)) = scale else {
        return bbox;
    };
    BoundingBox::new(
        (f64::from(bbox.x) * sx).round() as i32,
        (f64::from(bbox.y) * sy).round() as i32,
        (f64::from(bbox.width) * sx).round() as i32,
        (f64::from(bbox.height) * sy).round() as i32,
    )
}

/// Normalized grouping key for one detection
fn group_key(detection: &Detection) -> String {
    if detection.kind == "face_detection" {
        FACE_KEY.to_string()
    } else {
        // Already NFC from extraction; normalizing a key twice is harmless
        emoji::nfc(&detection.emoji)
    }
}

/// Initial-anchor clustering within one group
///
/// Walks detections in input order; each unused detection opens a cluster
/// and later detections join iff their IoU against that anchor strictly
/// exceeds the threshold. Measuring against the anchor only prevents
/// transitive drift: A-B-C chains where A and C never overlap.
fn cluster_group(detections: &[Detection]) -> Vec<Vec<usize>> {
    let mut used = vec![false; detections.len()];
    let mut clusters = Vec::new();

    for i in 0..detections.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut members = vec![i];
        for j in (i + 1)..detections.len() {
            if used[j] {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) > IOU_THRESHOLD {
                used[j] = true;
                members.push(j);
            }
        }
        clusters.push(members);
    }

    clusters
}

/// Same-service dedup and singleton filtering
fn clean_clusters(
    key: &str,
    detections: &[Detection],
    clusters: Vec<Vec<usize>>,
) -> Vec<Vec<usize>> {
    let mut cleaned = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        // One vote per service inside a cluster: keep the most confident
        let mut by_service: BTreeMap<&str, usize> = BTreeMap::new();
        for &idx in &cluster {
            let service = detections[idx].service.as_str();
            match by_service.get(service).copied() {
                Some(kept) => {
                    warn!(
                        "Duplicate {} detection from {} in one cluster, keeping highest confidence",
                        key, service
                    );
                    if detections[idx].confidence > detections[kept].confidence {
                        by_service.insert(service, idx);
                    }
                }
                None => {
                    by_service.insert(service, idx);
                }
            }
        }
        let mut members: Vec<usize> = cluster
            .iter()
            .copied()
            .filter(|idx| by_service.values().any(|kept| kept == idx))
            .collect();

        // Democratic consensus: a singleton needs a confident shout
        if members.len() == 1 && detections[members[0]].confidence < SINGLETON_CONFIDENCE {
            debug!(
                "Dropping low-confidence singleton {} from {}",
                key, detections[members[0]].service
            );
            members.clear();
        }
        if !members.is_empty() {
            cleaned.push(members);
        }
    }
    cleaned
}

/// Rank clusters and emit one instance per cluster
fn emit_instances(
    label: &str,
    group_emoji: &str,
    detections: &[Detection],
    clusters: &[Vec<usize>],
) -> Vec<Instance> {
    let mut scored: Vec<(f64, &Vec<usize>)> = clusters
        .iter()
        .map(|cluster| (cluster_score(detections, cluster), cluster))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let id_label = sanitize_label(label);
    scored
        .iter()
        .enumerate()
        .map(|(rank, (_, cluster))| {
            let merged_bbox = cluster
                .iter()
                .skip(1)
                .fold(detections[cluster[0]].bbox, |acc, &idx| {
                    acc.union(&detections[idx].bbox)
                });
            let avg_confidence = cluster
                .iter()
                .map(|&idx| detections[idx].confidence)
                .sum::<f64>()
                / cluster.len() as f64;

            Instance {
                cluster_id: format!("{}_{}", id_label, rank + 1),
                emoji: group_emoji.to_string(),
                label: label.to_string(),
                merged_bbox,
                detection_count: cluster.len(),
                avg_confidence: round3(avg_confidence),
                detections: cluster
                    .iter()
                    .map(|&idx| InstanceDetection {
                        service: detections[idx].service.clone(),
                        confidence: detections[idx].confidence,
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Cluster ranking score: member count dominates, then confidence, then a
/// gentle preference for larger objects
fn cluster_score(detections: &[Detection], cluster: &[usize]) -> f64 {
    let count = cluster.len() as f64;
    let avg_confidence = cluster
        .iter()
        .map(|&idx| detections[idx].confidence)
        .sum::<f64>()
        / count;
    let avg_area = cluster
        .iter()
        .map(|&idx| detections[idx].bbox.area() as f64)
        .sum::<f64>()
        / count;
    2.0 * count + 3.0 * avg_confidence + avg_area.max(1.0).log10()
}

fn sanitize_label(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use emoji_vision_common::{
        Analyzer, AnalyzerCategory, Prediction, PredictionKind, ResultMetadata,
    };

    const CAT: &str = "\u{1F431}";
    const CHAIR: &str = "\u{1FA91}";

    fn roster() -> AnalyzerRoster {
        let spatial = |id: &str| Analyzer {
            id: id.to_string(),
            name: id.to_uppercase(),
            host: "localhost".to_string(),
            port: 7770,
            endpoint: "/v3/analyze".to_string(),
            optimal_size: None,
            category: AnalyzerCategory::Spatial,
        };
        AnalyzerRoster::new(vec![spatial("yolo"), spatial("detectron2"), spatial("rtdetr")])
    }

    fn detection_pred(label: &str, emoji: &str, confidence: f64, bbox: BoundingBox) -> Prediction {
        let mut pred = Prediction::new(PredictionKind::ObjectDetection);
        pred.label = Some(label.to_string());
        pred.emoji = Some(emoji.to_string());
        pred.confidence = Some(confidence);
        pred.bbox = Some(bbox);
        pred
    }

    fn results_from(
        entries: Vec<(&str, Vec<Prediction>)>,
    ) -> BTreeMap<String, AnalysisResult> {
        entries
            .into_iter()
            .map(|(id, preds)| {
                (
                    id.to_string(),
                    AnalysisResult::success(preds, ResultMetadata::default()),
                )
            })
            .collect()
    }

    #[test]
    fn test_two_services_same_box_cluster_together() {
        let bbox = BoundingBox::new(0, 0, 100, 100);
        let results = results_from(vec![
            ("yolo", vec![detection_pred("cat", CAT, 0.9, bbox)]),
            ("detectron2", vec![detection_pred("cat", CAT, 0.9, bbox)]),
        ]);
        let output = cluster_detections(&results, &roster(), None);

        let group = output.groups.get(CAT).unwrap();
        assert_eq!(group.instances.len(), 1);
        let instance = &group.instances[0];
        assert_eq!(instance.cluster_id, "cat_1");
        assert_eq!(instance.detection_count, 2);
        assert_eq!(instance.merged_bbox, bbox);
        assert_eq!(instance.avg_confidence, 0.9);
    }

    #[test]
    fn test_iou_at_threshold_is_not_clustered() {
        // b sits inside a: intersection 3000, union 10000, IoU exactly 0.30
        let a = BoundingBox::new(0, 0, 100, 100);
        let b = BoundingBox::new(0, 0, 100, 30);
        assert!((a.iou(&b) - 0.30).abs() < 1e-9);

        let results = results_from(vec![
            ("yolo", vec![detection_pred("cat", CAT, 0.9, a)]),
            ("detectron2", vec![detection_pred("cat", CAT, 0.9, b)]),
        ]);
        let output = cluster_detections(&results, &roster(), None);
        let group = output.groups.get(CAT).unwrap();
        // Strict >: two separate clusters, both multi... both singletons >= 0.85
        assert_eq!(group.instances.len(), 2);
        assert!(group.instances.iter().all(|i| i.detection_count == 1));
    }

    #[test]
    fn test_low_confidence_singleton_is_dropped() {
        let results = results_from(vec![(
            "yolo",
            vec![detection_pred(
                "chair",
                CHAIR,
                0.5,
                BoundingBox::new(0, 0, 100, 100),
            )],
        )]);
        let output = cluster_detections(&results, &roster(), None);
        assert!(output.groups.get(CHAIR).is_none());
        assert!(output.all_detections.is_empty());
    }

    #[test]
    fn test_singleton_at_shout_threshold_is_kept() {
        let results = results_from(vec![(
            "yolo",
            vec![detection_pred(
                "chair",
                CHAIR,
                0.85,
                BoundingBox::new(0, 0, 100, 100),
            )],
        )]);
        let output = cluster_detections(&results, &roster(), None);
        let group = output.groups.get(CHAIR).unwrap();
        assert_eq!(group.instances.len(), 1);
        assert_eq!(group.instances[0].detection_count, 1);
    }

    #[test]
    fn test_distant_boxes_make_separate_instances() {
        // IoU(anchor, far) well below threshold
        let results = results_from(vec![
            (
                "yolo",
                vec![detection_pred(
                    "chair",
                    CHAIR,
                    0.9,
                    BoundingBox::new(0, 0, 100, 100),
                )],
            ),
            (
                "detectron2",
                vec![detection_pred(
                    "chair",
                    CHAIR,
                    0.6,
                    BoundingBox::new(80, 80, 100, 100),
                )],
            ),
        ]);
        let output = cluster_detections(&results, &roster(), None);
        let group = output.groups.get(CHAIR).unwrap();
        // The 0.6 singleton is below the shout threshold and dropped
        assert_eq!(group.instances.len(), 1);
        assert_eq!(group.instances[0].cluster_id, "chair_1");
        assert_eq!(group.instances[0].detection_count, 1);
        assert_eq!(group.instances[0].detections[0].service, "yolo");
    }

    #[test]
    fn test_same_service_dedup_keeps_highest_confidence() {
        let bbox = BoundingBox::new(0, 0, 100, 100);
        let near = BoundingBox::new(5, 5, 100, 100);
        let results = results_from(vec![
            (
                "yolo",
                vec![
                    detection_pred("cat", CAT, 0.6, bbox),
                    detection_pred("cat", CAT, 0.9, near),
                ],
            ),
            ("detectron2", vec![detection_pred("cat", CAT, 0.8, bbox)]),
        ]);
        let output = cluster_detections(&results, &roster(), None);
        let group = output.groups.get(CAT).unwrap();
        assert_eq!(group.instances.len(), 1);
        let instance = &group.instances[0];
        assert_eq!(instance.detection_count, 2);
        let yolo = instance
            .detections
            .iter()
            .find(|d| d.service == "yolo")
            .unwrap();
        assert_eq!(yolo.confidence, 0.9);
    }

    #[test]
    fn test_multi_member_cluster_services_are_distinct() {
        let bbox = BoundingBox::new(10, 10, 200, 150);
        let results = results_from(vec![
            ("yolo", vec![detection_pred("cat", CAT, 0.9, bbox)]),
            ("detectron2", vec![detection_pred("cat", CAT, 0.8, bbox)]),
            ("rtdetr", vec![detection_pred("cat", CAT, 0.7, bbox)]),
        ]);
        let output = cluster_detections(&results, &roster(), None);
        for instance in &output.groups.get(CAT).unwrap().instances {
            let mut services: Vec<_> =
                instance.detections.iter().map(|d| d.service.clone()).collect();
            services.sort();
            services.dedup();
            assert_eq!(services.len(), instance.detections.len());
        }
    }

    #[test]
    fn test_merged_bbox_covers_all_members() {
        let a = BoundingBox::new(0, 0, 100, 100);
        let b = BoundingBox::new(20, 30, 100, 100);
        let results = results_from(vec![
            ("yolo", vec![detection_pred("cat", CAT, 0.9, a)]),
            ("detectron2", vec![detection_pred("cat", CAT, 0.9, b)]),
        ]);
        let output = cluster_detections(&results, &roster(), None);
        let merged = output.groups.get(CAT).unwrap().instances[0].merged_bbox;
        for bbox in [a, b] {
            assert!(merged.x <= bbox.x && merged.y <= bbox.y);
            assert!(merged.x + merged.width >= bbox.x + bbox.width);
            assert!(merged.y + merged.height >= bbox.y + bbox.height);
        }
    }

    #[test]
    fn test_rescaling_identity_when_dims_match() {
        let bbox = BoundingBox::new(10, 20, 50, 60);
        let mut metadata = ResultMetadata::default();
        metadata.processing_dimensions = Some(Dimensions::new(640, 480));
        let results: BTreeMap<String, AnalysisResult> = [(
            "yolo".to_string(),
            AnalysisResult::success(vec![detection_pred("cat", CAT, 0.9, bbox)], metadata),
        )]
        .into();
        let output =
            cluster_detections(&results, &roster(), Some(Dimensions::new(640, 480)));
        assert_eq!(output.all_detections[0].bbox, bbox);
        assert_eq!(output.all_detections[0].original_bbox, bbox);
    }

    #[test]
    fn test_rescaling_maps_to_display_space() {
        let bbox = BoundingBox::new(320, 240, 160, 120);
        let mut metadata = ResultMetadata::default();
        metadata.processing_dimensions = Some(Dimensions::new(640, 480));
        let results: BTreeMap<String, AnalysisResult> = [(
            "yolo".to_string(),
            AnalysisResult::success(vec![detection_pred("cat", CAT, 0.9, bbox)], metadata),
        )]
        .into();
        let output =
            cluster_detections(&results, &roster(), Some(Dimensions::new(1280, 960)));
        assert_eq!(
            output.all_detections[0].bbox,
            BoundingBox::new(640, 480, 320, 240)
        );
        assert_eq!(output.all_detections[0].original_bbox, bbox);
    }

    #[test]
    fn test_decomposed_emoji_joins_precomposed_group() {
        let bbox = BoundingBox::new(0, 0, 100, 100);
        // e + combining acute vs precomposed e-acute: same key after NFC
        let results = results_from(vec![
            (
                "yolo",
                vec![detection_pred("sign", "\u{0065}\u{0301}", 0.9, bbox)],
            ),
            (
                "detectron2",
                vec![detection_pred("sign", "\u{00E9}", 0.9, bbox)],
            ),
        ]);
        let output = cluster_detections(&results, &roster(), None);
        assert_eq!(output.groups.len(), 1);
        assert_eq!(
            output.groups.get("\u{00E9}").unwrap().instances[0].detection_count,
            2
        );
    }

    #[test]
    fn test_failed_analyzer_contributes_nothing() {
        let results: BTreeMap<String, AnalysisResult> = [(
            "yolo".to_string(),
            AnalysisResult::failure(emoji_vision_common::ErrorKind::Timeout, "deadline"),
        )]
        .into();
        let output = cluster_detections(&results, &roster(), None);
        assert!(output.groups.is_empty());
    }

    #[test]
    fn test_every_detection_in_exactly_one_cluster() {
        let boxes = [
            BoundingBox::new(0, 0, 100, 100),
            BoundingBox::new(10, 10, 100, 100),
            BoundingBox::new(400, 400, 80, 80),
        ];
        let results = results_from(vec![
            ("yolo", vec![detection_pred("cat", CAT, 0.9, boxes[0])]),
            ("detectron2", vec![detection_pred("cat", CAT, 0.9, boxes[1])]),
            ("rtdetr", vec![detection_pred("cat", CAT, 0.9, boxes[2])]),
        ]);
        let output = cluster_detections(&results, &roster(), None);
        let group = output.groups.get(CAT).unwrap();
        let total: usize = group.instances.iter().map(|i| i.detection_count).sum();
        assert_eq!(total, 3);
        assert_eq!(group.detections.len(), 3);
    }
}
