//! End-to-end analysis pipeline and response assembly
//!
//! One request flows orchestrator -> clustering -> voting -> captions ->
//! assembly. Everything after the fan-out is synchronous CPU work over the
//! collected result map; the only suspension points are the analyzer calls
//! and the optional similarity scoring.

use crate::types::{AnalysisResponse, CompactResult, ImageData, VotesBlock};
use crate::ApiState;
use emoji_vision_captions::{collect_captions, CaptionRecord, ScoreSource};
use emoji_vision_clustering::cluster_detections;
use emoji_vision_orchestrator::{FanOutReport, ImageHandle};
use emoji_vision_voting::{run_voting, ConsensusReport};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Run the full pipeline for one image
pub async fn run_pipeline(
    state: &ApiState,
    handle: ImageHandle,
    mut image_data: ImageData,
) -> AnalysisResponse {
    let started = Instant::now();

    let report = state.orchestrator.analyze(&handle).await;
    image_data.dimensions = report.dimensions;

    let roster = state.orchestrator.roster();
    let clusters = cluster_detections(&report.results, roster, report.dimensions);
    let consensus = run_voting(&report.results, roster, &clusters);

    let source = match &handle {
        ImageHandle::LocalUrl { url, .. } => ScoreSource::Url(url),
        ImageHandle::File { path } => ScoreSource::File(path.to_str().unwrap_or_default()),
    };
    let captions = collect_captions(
        &report.results,
        roster,
        state.scorer.as_ref(),
        source,
    )
    .await;

    info!(
        "Analysis complete: {} consensus emojis, {} captions, {}/{} services ok",
        consensus.consensus.len(),
        captions.len(),
        report.statuses.len() - report.health_summary.as_ref().map_or(0, |s| s.failed_count),
        report.statuses.len()
    );

    assemble_response(
        Uuid::new_v4().to_string(),
        started.elapsed().as_secs_f64(),
        image_data,
        &report,
        consensus,
        captions,
    )
}

/// Merge all pipeline outputs into the single response document
#[must_use]
pub fn assemble_response(
    image_id: String,
    analysis_time_seconds: f64,
    image_data: ImageData,
    report: &FanOutReport,
    consensus: ConsensusReport,
    captions: Vec<CaptionRecord>,
) -> AnalysisResponse {
    // Compact per-service results; BTreeMap keys keep them sorted by id
    let mut results = BTreeMap::new();
    for status in &report.statuses {
        let Some(result) = report.results.get(&status.service) else {
            continue;
        };
        results.insert(
            status.service.clone(),
            CompactResult {
                ok: result.ok,
                status: status.status,
                predictions: result.predictions.clone(),
                processing_time: result.metadata.processing_time,
            },
        );
    }

    AnalysisResponse {
        success: report.health_summary.is_none(),
        image_id,
        analysis_time_seconds: round3(analysis_time_seconds),
        image_data,
        votes: VotesBlock {
            consensus: consensus.consensus,
            debug: consensus.debug,
        },
        special: consensus.special,
        captions,
        results,
        service_health_summary: report.health_summary.clone(),
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
