//! End-to-end pipeline scenarios over canned analyzer results
//!
//! These exercise clustering, voting, caption aggregation and response
//! assembly exactly as the handlers drive them, without any live analyzer.

use emoji_vision_api_server::{assemble_response, ImageData, ProcessingMethod};
use emoji_vision_captions::collect_captions;
use emoji_vision_clustering::cluster_detections;
use emoji_vision_common::{
    emoji, AnalysisResult, Analyzer, AnalyzerCategory, AnalyzerRoster, BoundingBox, EmojiMapping,
    ErrorKind, Prediction, PredictionKind, ResultMetadata, ServiceState, ServiceStatus,
};
use emoji_vision_orchestrator::{FanOutReport, ServiceHealthSummary};
use emoji_vision_voting::run_voting;
use std::time::Duration;

const CAT: &str = "\u{1F431}";
const CHAIR: &str = "\u{1FA91}";

fn analyzer(id: &str, category: AnalyzerCategory) -> Analyzer {
    Analyzer {
        id: id.to_string(),
        name: id.to_uppercase(),
        host: "localhost".to_string(),
        port: 7770,
        endpoint: "/v3/analyze".to_string(),
        optimal_size: None,
        category,
    }
}

fn roster() -> AnalyzerRoster {
    AnalyzerRoster::new(vec![
        analyzer("yolo", AnalyzerCategory::Spatial),
        analyzer("detectron2", AnalyzerCategory::Spatial),
        analyzer("rtdetr", AnalyzerCategory::Spatial),
        analyzer("blip", AnalyzerCategory::Semantic),
        analyzer("ollama", AnalyzerCategory::Semantic),
        analyzer("face", AnalyzerCategory::Specialized),
        analyzer("nsfw", AnalyzerCategory::Specialized),
    ])
}

fn detection(label: &str, e: &str, confidence: f64, bbox: BoundingBox) -> Prediction {
    let mut pred = Prediction::new(PredictionKind::ObjectDetection);
    pred.label = Some(label.to_string());
    pred.emoji = Some(e.to_string());
    pred.confidence = Some(confidence);
    pred.bbox = Some(bbox);
    pred
}

fn caption(text: &str, mappings: Vec<(&str, &str)>) -> Prediction {
    let mut pred = Prediction::new(PredictionKind::Caption {
        emoji_mappings: mappings
            .into_iter()
            .map(|(word, e)| EmojiMapping {
                word: word.to_string(),
                emoji: e.to_string(),
                shiny: false,
            })
            .collect(),
    });
    pred.text = Some(text.to_string());
    pred
}

fn ok(preds: Vec<Prediction>) -> AnalysisResult {
    AnalysisResult::success(preds, ResultMetadata::default())
}

fn success_status(service: &str, prediction_count: usize) -> ServiceStatus {
    ServiceStatus {
        service: service.to_string(),
        status: ServiceState::Success,
        processing_time_ms: 40,
        prediction_count,
        error_message: None,
    }
}

fn report_from(entries: Vec<(&str, AnalysisResult)>) -> FanOutReport {
    let statuses = entries
        .iter()
        .map(|(id, result)| {
            if result.ok {
                success_status(id, result.predictions.len())
            } else {
                ServiceStatus {
                    service: (*id).to_string(),
                    status: ServiceState::Timeout,
                    processing_time_ms: 15000,
                    prediction_count: 0,
                    error_message: result.error_message.clone(),
                }
            }
        })
        .collect::<Vec<_>>();
    let degraded: Vec<String> = statuses
        .iter()
        .filter(|s| s.status != ServiceState::Success)
        .map(|s| s.service.clone())
        .collect();
    let health_summary = (!degraded.is_empty()).then(|| ServiceHealthSummary {
        failed_count: degraded.len(),
        total_services: statuses.len(),
        degraded_services: degraded,
    });
    FanOutReport {
        results: entries
            .into_iter()
            .map(|(id, r)| (id.to_string(), r))
            .collect(),
        statuses,
        dimensions: None,
        health_summary,
        elapsed: Duration::from_millis(120),
    }
}

fn direct_file_image_data() -> ImageData {
    ImageData {
        dimensions: None,
        processing_method: ProcessingMethod::DirectFileAccess,
        image_url: None,
        file_path: Some("/data/images/input.jpg".to_string()),
        original_url: None,
    }
}

async fn run(entries: Vec<(&str, AnalysisResult)>) -> emoji_vision_api_server::AnalysisResponse {
    let roster = roster();
    let report = report_from(entries);
    let clusters = cluster_detections(&report.results, &roster, report.dimensions);
    let consensus = run_voting(&report.results, &roster, &clusters);
    let captions = collect_captions(
        &report.results,
        &roster,
        None,
        emoji_vision_captions::ScoreSource::File("/data/images/input.jpg"),
    )
    .await;
    assemble_response(
        "test-image".to_string(),
        0.12,
        direct_file_image_data(),
        &report,
        consensus,
        captions,
    )
}

#[tokio::test]
async fn two_detectors_and_a_caption_agree_on_a_cat() {
    let bbox = BoundingBox::new(0, 0, 100, 100);
    let response = run(vec![
        ("yolo", ok(vec![detection("cat", CAT, 0.9, bbox)])),
        ("detectron2", ok(vec![detection("cat", CAT, 0.9, bbox)])),
        ("blip", ok(vec![caption("a cat", vec![("cat", CAT)])])),
    ])
    .await;

    assert!(response.success);
    assert_eq!(response.votes.consensus.len(), 1);
    let item = &response.votes.consensus[0];
    assert_eq!(item.emoji, CAT);
    assert_eq!(item.votes, 3);

    let boxes = item.bounding_boxes.as_ref().unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].cluster_id, "cat_1");
    assert_eq!(boxes[0].detection_count, 2);
    assert_eq!(boxes[0].bbox, BoundingBox::new(0, 0, 100, 100));
}

#[tokio::test]
async fn lone_uncertain_chair_disappears_entirely() {
    let response = run(vec![(
        "yolo",
        ok(vec![detection(
            "chair",
            CHAIR,
            0.5,
            BoundingBox::new(0, 0, 100, 100),
        )]),
    )])
    .await;

    assert!(response.votes.consensus.is_empty());
    // The dropped singleton leaves no spatial trace anywhere
    let json = serde_json::to_string(&response).unwrap();
    assert!(!json.contains("chair_1"));
}

#[tokio::test]
async fn non_overlapping_chairs_become_separate_instances() {
    // IoU between the two boxes is 400/19600, far below the threshold
    let a = BoundingBox::new(0, 0, 100, 100);
    let b = BoundingBox::new(80, 80, 100, 100);
    let roster = roster();

    // Second detector confident: both instances survive
    let report = report_from(vec![
        ("yolo", ok(vec![detection("chair", CHAIR, 0.9, a)])),
        ("detectron2", ok(vec![detection("chair", CHAIR, 0.9, b)])),
    ]);
    let clusters = cluster_detections(&report.results, &roster, None);
    let instances = &clusters.groups.get(CHAIR).unwrap().instances;
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].cluster_id, "chair_1");
    assert_eq!(instances[1].cluster_id, "chair_2");
    assert!(instances.iter().all(|i| i.detection_count == 1));

    // Second detector hesitant: its singleton is dropped
    let report = report_from(vec![
        ("yolo", ok(vec![detection("chair", CHAIR, 0.9, a)])),
        ("detectron2", ok(vec![detection("chair", CHAIR, 0.6, b)])),
    ]);
    let clusters = cluster_detections(&report.results, &roster, None);
    let instances = &clusters.groups.get(CHAIR).unwrap().instances;
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].cluster_id, "chair_1");
}

#[tokio::test]
async fn nsfw_without_humans_is_reported_but_flagged() {
    let mut nsfw_pred = Prediction::new(PredictionKind::ContentModeration);
    nsfw_pred.emoji = Some(emoji::NSFW.to_string());
    nsfw_pred.confidence = Some(0.9);

    let response = run(vec![
        ("nsfw", ok(vec![nsfw_pred])),
        ("blip", ok(vec![caption("skin", vec![("skin", emoji::NSFW)])])),
    ])
    .await;

    // The sidecar reports it regardless of the vote
    assert!(response.special.nsfw.detected);
    assert_eq!(response.special.nsfw.confidence, Some(0.9));

    // In the consensus it is flagged and clamped
    let item = response
        .votes
        .consensus
        .iter()
        .find(|i| i.emoji == emoji::NSFW)
        .unwrap();
    assert_eq!(
        item.validation.as_ref().unwrap(),
        &vec!["suspicious_no_humans".to_string()]
    );
    assert!(item.evidence_weight >= 0.0);
    assert!(item.final_score >= 0.0);
}

#[tokio::test]
async fn nsfw_below_the_floor_still_reaches_the_sidecar() {
    let mut nsfw_pred = Prediction::new(PredictionKind::ContentModeration);
    nsfw_pred.emoji = Some(emoji::NSFW.to_string());
    nsfw_pred.confidence = Some(0.9);

    let response = run(vec![("nsfw", ok(vec![nsfw_pred]))]).await;
    assert!(response.special.nsfw.detected);
    assert!(response.votes.consensus.is_empty());
}

#[tokio::test]
async fn both_captions_are_emitted_and_ordered() {
    let response = run(vec![
        ("blip", ok(vec![caption("a cat on a table", vec![])])),
        (
            "ollama",
            ok(vec![caption("feline on wooden furniture", vec![])]),
        ),
    ])
    .await;

    assert_eq!(response.captions.len(), 2);
    // Unscored tie-break: fewer meaningful words wins
    assert_eq!(response.captions[0].service, "blip");
    assert_eq!(response.captions[0].words, 2);
    assert_eq!(response.captions[1].service, "ollama");
    assert!(response.captions.iter().all(|c| c.clip_similarity.is_none()));
}

#[tokio::test]
async fn partial_timeouts_degrade_but_do_not_fail() {
    let bbox = BoundingBox::new(0, 0, 100, 100);
    let timeout = || AnalysisResult::failure(ErrorKind::Timeout, "deadline expired");
    let response = run(vec![
        ("yolo", ok(vec![detection("cat", CAT, 0.9, bbox)])),
        ("detectron2", ok(vec![detection("cat", CAT, 0.9, bbox)])),
        ("blip", ok(vec![caption("a cat", vec![("cat", CAT)])])),
        ("rtdetr", timeout()),
        ("face", timeout()),
        ("nsfw", timeout()),
    ])
    .await;

    assert!(!response.success);
    let summary = response.service_health_summary.as_ref().unwrap();
    assert_eq!(summary.failed_count, 3);
    assert_eq!(summary.total_services, 6);
    assert_eq!(summary.degraded_services, vec!["rtdetr", "face", "nsfw"]);

    // Consensus still derives from the analyzers that answered
    assert_eq!(response.votes.consensus.len(), 1);
    assert_eq!(response.votes.consensus[0].votes, 3);

    // Compact results keep the degraded services visible
    assert_eq!(response.results.len(), 6);
    assert_eq!(
        response.results.get("rtdetr").unwrap().status,
        ServiceState::Timeout
    );
}

mod router {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use emoji_vision_api_server::{build_router, ApiState};
    use emoji_vision_common::{AppConfig, ServerConfig};
    use tower::ServiceExt;

    fn empty_roster_state() -> ApiState {
        let config = AppConfig {
            server: ServerConfig {
                upload_dir: std::env::temp_dir().join("emoji-vision-router-test"),
                ..ServerConfig::default()
            },
            analyzers: vec![],
        };
        ApiState::new(config).unwrap()
    }

    #[tokio::test]
    async fn missing_input_is_a_bad_request() {
        let app = build_router(empty_roster_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/analyze")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn nonexistent_file_is_a_bad_request() {
        let app = build_router(empty_roster_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/analyze?file=/no/such/image.jpg")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_with_empty_roster_is_healthy() {
        let app = build_router(empty_roster_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["healthy_services"], "0/0");
    }
}

#[tokio::test]
async fn identical_inputs_produce_identical_documents() {
    let bbox = BoundingBox::new(0, 0, 100, 100);
    let entries = || {
        vec![
            ("yolo", ok(vec![detection("cat", CAT, 0.9, bbox)])),
            ("detectron2", ok(vec![detection("cat", CAT, 0.8, bbox)])),
            ("blip", ok(vec![caption("a cat", vec![("cat", CAT)])])),
        ]
    };
    let first = run(entries()).await;
    let second = run(entries()).await;
    // Identical modulo image_id and timings, which are held constant here
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}
