//! Emoji consensus voting engine
//!
//! Each analyzer gets one democratic vote per emoji it mentions; votes are
//! then weighted by the kind and agreement of their evidence:
//! - **spatial** corroboration (several detectors boxing the same object)
//!   earns a bonus per extra detection in the best cluster
//! - **content** consensus (several caption/classification services naming
//!   the same emoji) earns a bonus once two or more agree
//! - **curation** rules validate or penalize specific emojis using
//!   cross-emoji evidence (a face confirms a person, a person legitimizes an
//!   NSFW hit, an NSFW hit with no humans anywhere is suspect)
//!
//! The engine consumes the clustering engine's output; it never re-clusters.
//! Cluster instances are folded into the vote stream as sentinel detections
//! under the reserved service id [`SENTINEL_SERVICE`], which carries spatial
//! evidence but is never counted as a voting service.

mod special;

pub use special::{extract_special, SpecialDetection, SpecialDetections};

use emoji_vision_clustering::{ClusterOutput, GroupedEmoji};
use emoji_vision_common::{emoji, AnalysisResult, AnalyzerCategory, AnalyzerRoster, BoundingBox};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Reserved service id for detections synthesized from cluster instances
pub const SENTINEL_SERVICE: &str = "spatial_clustering";

/// Confidence assigned to votes that carry none of their own
pub const DEFAULT_CONFIDENCE: f64 = 0.75;

/// Minimum distinct voting services for an emoji to reach the consensus
pub const VOTE_FLOOR: usize = 2;

/// Kind of signal backing one vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
    Spatial,
    Semantic,
    Specialized,
    Classification,
    Other,
}

impl From<AnalyzerCategory> for EvidenceType {
    fn from(category: AnalyzerCategory) -> Self {
        match category {
            AnalyzerCategory::Spatial => Self::Spatial,
            AnalyzerCategory::Semantic => Self::Semantic,
            AnalyzerCategory::Specialized => Self::Specialized,
            AnalyzerCategory::Classification => Self::Classification,
            AnalyzerCategory::Other => Self::Other,
        }
    }
}

/// One extracted vote for one emoji
#[derive(Debug, Clone)]
pub struct Vote {
    /// Voting service, or [`SENTINEL_SERVICE`] for cluster sentinels
    pub service: String,
    /// NFC-normalized emoji
    pub emoji: String,
    /// Evidence category of the vote
    pub evidence_type: EvidenceType,
    /// Vote confidence
    pub confidence: f64,
    /// Caption word that produced the vote, for caption mappings
    pub word: Option<String>,
    /// Vote provenance marker (`caption_mapping` for caption votes)
    pub source: Option<&'static str>,
    /// Rare-find marker
    pub shiny: bool,
    /// Cluster summary for sentinel votes
    pub spatial_data: Option<SentinelInstance>,
    /// Properties carried by specialized predictions (pose indicators etc.)
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Cluster instance summary carried by a sentinel vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelInstance {
    /// Cluster id the sentinel mirrors
    pub cluster_id: String,
    /// Number of detections in the cluster
    pub detection_count: usize,
    /// Mean cluster confidence
    pub avg_confidence: f64,
}

/// Spatial evidence subtotal for one emoji
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialEvidence {
    /// Distinct detectors that voted spatially (sentinels excluded)
    pub service_count: usize,
    /// Largest per-instance detection count; drives the spatial bonus
    pub max_detection_count: usize,
    /// Mean confidence across spatial votes, 3 decimals
    pub avg_confidence: f64,
    /// Number of cluster instances
    pub total_instances: usize,
}

/// Semantic evidence subtotal for one emoji
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticEvidence {
    /// Distinct caption services that voted
    pub service_count: usize,
    /// Caption words behind the votes
    pub words: Vec<String>,
    /// Vote provenance markers
    pub sources: Vec<String>,
}

/// Classification evidence subtotal; reserved, empty with the stock roster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvidence {
    pub service_count: usize,
    pub sources: Vec<String>,
}

/// One specialized contribution (face / nsfw / ocr)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecializedDetection {
    pub service: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Evidence analysis for one emoji group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmojiEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationEvidence>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub specialized: BTreeMap<String, Vec<SpecializedDetection>>,
}

/// All votes and evidence for one emoji
#[derive(Debug, Clone)]
pub struct EmojiGroup {
    pub emoji: String,
    pub votes: Vec<Vote>,
    /// Distinct non-sentinel services in first-vote order
    pub voting_services: Vec<String>,
    pub total_votes: usize,
    pub evidence: EmojiEvidence,
    pub shiny: bool,
    /// Weight used for ranking, frozen before curation
    pub rank_weight: f64,
    pub evidence_weight: f64,
    pub final_score: f64,
    pub validation: Vec<String>,
}

/// Summary of an emoji's cluster instances on the consensus entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstancesSummary {
    /// Number of distinct instances
    pub count: usize,
    /// Largest per-instance detection count
    pub max_detection_count: usize,
    /// Mean confidence across spatial evidence, 3 decimals
    pub avg_confidence: f64,
}

/// One reported bounding box on a consensus entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusBox {
    pub cluster_id: String,
    pub bbox: BoundingBox,
    pub detection_count: usize,
    pub avg_confidence: f64,
}

/// Final ranked entry for one emoji
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusItem {
    pub emoji: String,
    pub votes: usize,
    /// Evidence weight after curation, 2 decimals
    pub evidence_weight: f64,
    /// Final score after curation, 2 decimals
    pub final_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_summary: Option<InstancesSummary>,
    /// Voting services in first-vote order
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_boxes: Option<Vec<ConsensusBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shiny: bool,
}

/// Vote bookkeeping surfaced for debugging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteCounters {
    /// Votes cast by real services (sentinels excluded)
    pub votes_cast: usize,
    /// Emoji groups considered
    pub groups_considered: usize,
    /// Groups that reached the vote floor
    pub groups_emitted: usize,
}

/// Complete output of the voting engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusReport {
    /// Ranked consensus, highest support first
    pub consensus: Vec<ConsensusItem>,
    /// Out-of-competition sidecars
    pub special: SpecialDetections,
    /// Debug counters
    pub debug: VoteCounters,
}

/// Run the full voting pipeline over collected analyzer results
///
/// `results` is consulted in roster order so tie resolution is reproducible
/// for a given input regardless of analyzer completion order.
#[must_use]
pub fn run_voting(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &AnalyzerRoster,
    clusters: &ClusterOutput,
) -> ConsensusReport {
    let votes = extract_votes(results, roster, clusters);
    let votes_cast = votes.iter().filter(|v| v.service != SENTINEL_SERVICE).count();
    debug!("Extracted {} votes ({} from services)", votes.len(), votes_cast);

    let mut groups = group_votes(votes);
    let groups_considered = groups.len();
    curate(&mut groups);

    let mut ranked: Vec<&EmojiGroup> = groups
        .values()
        .filter(|g| g.total_votes >= VOTE_FLOOR)
        .collect();
    ranked.sort_by(|a, b| {
        b.total_votes.cmp(&a.total_votes).then(
            b.rank_weight
                .partial_cmp(&a.rank_weight)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });

    let consensus: Vec<ConsensusItem> = ranked
        .into_iter()
        .map(|group| emit_item(group, clusters))
        .collect();
    let groups_emitted = consensus.len();

    ConsensusReport {
        consensus,
        special: extract_special(results),
        debug: VoteCounters {
            votes_cast,
            groups_considered,
            groups_emitted,
        },
    }
}

/// Extract one vote stream from all successful analyzer results plus the
/// clustering sentinels
fn extract_votes(
    results: &BTreeMap<String, AnalysisResult>,
    roster: &AnalyzerRoster,
    clusters: &ClusterOutput,
) -> Vec<Vote> {
    let mut votes = Vec::new();

    for analyzer in roster.iter() {
        let Some(result) = results.get(&analyzer.id) else {
            continue;
        };
        if !result.ok {
            continue;
        }

        // One vote per emoji per analyzer
        let mut seen: Vec<String> = Vec::new();
        for prediction in &result.predictions {
            let mappings = prediction.emoji_mappings();
            if !mappings.is_empty() {
                for mapping in mappings {
                    let key = emoji::nfc(&mapping.emoji);
                    if seen.contains(&key) {
                        continue;
                    }
                    seen.push(key.clone());
                    votes.push(Vote {
                        service: analyzer.id.clone(),
                        emoji: key,
                        evidence_type: EvidenceType::Semantic,
                        confidence: DEFAULT_CONFIDENCE,
                        word: Some(mapping.word.clone()),
                        source: Some("caption_mapping"),
                        shiny: mapping.shiny,
                        spatial_data: None,
                        properties: serde_json::Map::new(),
                    });
                }
            } else if let Some(raw) = &prediction.emoji {
                // Color palette emojis describe the image, not its contents
                if prediction.kind.name() == "color_analysis" {
                    continue;
                }
                let key = emoji::nfc(raw);
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key.clone());
                votes.push(Vote {
                    service: analyzer.id.clone(),
                    emoji: key,
                    evidence_type: analyzer.category.into(),
                    confidence: prediction.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                    word: None,
                    source: None,
                    shiny: false,
                    spatial_data: None,
                    properties: prediction.properties.clone(),
                });
            }
        }
    }

    // Fold cluster instances in as sentinels; they carry the spatial
    // consensus but never count as voters
    for group in clusters.groups.values() {
        for instance in &group.instances {
            votes.push(Vote {
                service: SENTINEL_SERVICE.to_string(),
                emoji: group.emoji.clone(),
                evidence_type: EvidenceType::Spatial,
                confidence: instance.avg_confidence,
                word: None,
                source: None,
                shiny: false,
                spatial_data: Some(SentinelInstance {
                    cluster_id: instance.cluster_id.clone(),
                    detection_count: instance.detection_count,
                    avg_confidence: instance.avg_confidence,
                }),
                properties: serde_json::Map::new(),
            });
        }
    }

    votes
}

/// Group votes by emoji and compute evidence subtotals and weights
fn group_votes(votes: Vec<Vote>) -> BTreeMap<String, EmojiGroup> {
    let mut grouped: BTreeMap<String, Vec<Vote>> = BTreeMap::new();
    for vote in votes {
        grouped.entry(vote.emoji.clone()).or_default().push(vote);
    }

    grouped
        .into_iter()
        .map(|(key, votes)| {
            let mut voting_services: Vec<String> = Vec::new();
            for vote in &votes {
                if vote.service != SENTINEL_SERVICE
                    && !voting_services.contains(&vote.service)
                {
                    voting_services.push(vote.service.clone());
                }
            }
            let total_votes = voting_services.len();
            let evidence = summarize_evidence(&votes);
            let shiny = votes.iter().any(|v| v.shiny);

            let spatial_bonus = evidence
                .spatial
                .as_ref()
                .map_or(0, |s| s.max_detection_count.saturating_sub(1));
            let semantic_count = evidence.semantic.as_ref().map_or(0, |s| s.service_count);
            let classification_count = evidence
                .classification
                .as_ref()
                .map_or(0, |c| c.service_count);
            let content_sum = semantic_count + classification_count;
            let content_bonus = if content_sum >= 2 { content_sum - 1 } else { 0 };

            let weight = (total_votes + spatial_bonus + content_bonus) as f64;
            let final_score = total_votes as f64 + weight;

            let group = EmojiGroup {
                emoji: key.clone(),
                votes,
                voting_services,
                total_votes,
                evidence,
                shiny,
                rank_weight: weight,
                evidence_weight: weight,
                final_score,
                validation: Vec::new(),
            };
            (key, group)
        })
        .collect()
}

/// Compute spatial / semantic / classification / specialized subtotals
fn summarize_evidence(votes: &[Vote]) -> EmojiEvidence {
    let spatial_votes: Vec<&Vote> = votes
        .iter()
        .filter(|v| v.evidence_type == EvidenceType::Spatial)
        .collect();
    let spatial = if spatial_votes.is_empty() {
        None
    } else {
        let mut services: Vec<&str> = Vec::new();
        let mut max_detection_count = 1;
        let mut total_instances = 0;
        for vote in &spatial_votes {
            if vote.service != SENTINEL_SERVICE && !services.contains(&vote.service.as_str()) {
                services.push(&vote.service);
            }
            if let Some(instance) = &vote.spatial_data {
                total_instances += 1;
                max_detection_count = max_detection_count.max(instance.detection_count);
            }
        }
        let avg_confidence = spatial_votes.iter().map(|v| v.confidence).sum::<f64>()
            / spatial_votes.len() as f64;
        Some(SpatialEvidence {
            service_count: services.len(),
            max_detection_count,
            avg_confidence: round3(avg_confidence),
            total_instances,
        })
    };

    let semantic_votes: Vec<&Vote> = votes
        .iter()
        .filter(|v| v.evidence_type == EvidenceType::Semantic)
        .collect();
    let semantic = if semantic_votes.is_empty() {
        None
    } else {
        let mut evidence = SemanticEvidence::default();
        let mut services: Vec<&str> = Vec::new();
        for vote in &semantic_votes {
            if !services.contains(&vote.service.as_str()) {
                services.push(&vote.service);
            }
            if let Some(word) = &vote.word {
                evidence.words.push(word.clone());
            }
            if let Some(source) = vote.source {
                evidence.sources.push(source.to_string());
            }
        }
        evidence.service_count = services.len();
        Some(evidence)
    };

    let classification_votes: Vec<&Vote> = votes
        .iter()
        .filter(|v| v.evidence_type == EvidenceType::Classification)
        .collect();
    let classification = if classification_votes.is_empty() {
        None
    } else {
        let mut services: Vec<&str> = Vec::new();
        for vote in &classification_votes {
            if !services.contains(&vote.service.as_str()) {
                services.push(&vote.service);
            }
        }
        Some(ClassificationEvidence {
            service_count: services.len(),
            sources: classification_votes
                .iter()
                .map(|v| v.service.clone())
                .collect(),
        })
    };

    let mut specialized: BTreeMap<String, Vec<SpecializedDetection>> = BTreeMap::new();
    for vote in votes {
        if vote.evidence_type == EvidenceType::Specialized {
            specialized
                .entry(vote.service.clone())
                .or_default()
                .push(SpecializedDetection {
                    service: vote.service.clone(),
                    confidence: vote.confidence,
                    properties: vote.properties.clone(),
                });
        }
    }

    EmojiEvidence {
        spatial,
        semantic,
        classification,
        specialized,
    }
}

/// Cross-emoji curation, applied after ranking weights are frozen
fn curate(groups: &mut BTreeMap<String, EmojiGroup>) {
    let has_person = groups.contains_key(emoji::PERSON);
    let has_face = groups.contains_key(emoji::FACE);
    let has_pose = groups.values().any(|g| {
        g.evidence
            .specialized
            .values()
            .flatten()
            .any(|d| d.properties.contains_key("pose"))
    });

    if has_person {
        if let Some(person) = groups.get_mut(emoji::PERSON) {
            if has_face {
                person.evidence_weight += 1.0;
                person.final_score += 1.0;
                person.validation.push("face_confirmed".to_string());
            }
            if has_pose {
                person.evidence_weight += 1.0;
                person.validation.push("pose_confirmed".to_string());
            }
        }
    }

    // NSFW needs human context to be plausible
    if let Some(nsfw) = groups.get_mut(emoji::NSFW) {
        if has_person {
            nsfw.evidence_weight += 1.0;
            nsfw.validation.push("human_context_confirmed".to_string());
        } else {
            nsfw.evidence_weight -= 1.0;
            nsfw.validation.push("suspicious_no_humans".to_string());
        }
        nsfw.evidence_weight = nsfw.evidence_weight.max(0.0);
        nsfw.final_score = nsfw.final_score.max(0.0);
    }
}

/// Build the emitted consensus entry for one group
fn emit_item(group: &EmojiGroup, clusters: &ClusterOutput) -> ConsensusItem {
    let cluster_group = find_cluster_group(&group.emoji, clusters);
    let bounding_boxes = if group.evidence.spatial.is_some() {
        cluster_group.map(|g| {
            g.instances
                .iter()
                .map(|instance| ConsensusBox {
                    cluster_id: instance.cluster_id.clone(),
                    bbox: instance.merged_bbox,
                    detection_count: instance.detection_count,
                    avg_confidence: instance.avg_confidence,
                })
                .collect()
        })
    } else {
        None
    };
    let instances_summary = group.evidence.spatial.as_ref().map(|s| InstancesSummary {
        count: s.total_instances,
        max_detection_count: s.max_detection_count,
        avg_confidence: s.avg_confidence,
    });

    ConsensusItem {
        emoji: group.emoji.clone(),
        votes: group.total_votes,
        evidence_weight: round2(group.evidence_weight),
        final_score: round2(group.final_score),
        instances_summary,
        services: group.voting_services.clone(),
        bounding_boxes,
        validation: if group.validation.is_empty() {
            None
        } else {
            Some(group.validation.clone())
        },
        shiny: group.shiny,
    }
}

/// Cluster group backing a consensus emoji; face clusters live under the
/// `face` key rather than their emoji
fn find_cluster_group<'a>(
    consensus_emoji: &str,
    clusters: &'a ClusterOutput,
) -> Option<&'a GroupedEmoji> {
    if let Some(group) = clusters.groups.get(consensus_emoji) {
        return Some(group);
    }
    if consensus_emoji == emoji::FACE {
        return clusters.groups.get(emoji_vision_clustering::FACE_KEY);
    }
    None
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
