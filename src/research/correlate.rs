//! Correlation engine: cross-evidence synthesis.
//!
//! Takes the findings produced by the analysis fan-out and derives the
//! case-level artifacts: a deduplicated knowledge graph, a
//! chronological timeline, detected contradictions, and recurring
//! patterns.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::Result;
use crate::core::{
    Finding, FindingType, GraphNode, GraphRelationship, NodeType, RelationshipType, TimelineEvent,
};
use crate::embedding::{Embedder, cosine_similarity};

/// Claim texts at or above this cosine similarity are candidates for
/// contradiction when their predicates disagree.
pub const CONTRADICTION_SIMILARITY_THRESHOLD: f32 = 0.65;

/// Events within this window form a temporal cluster pattern.
const CLUSTER_WINDOW_HOURS: i64 = 24;

/// Severity of a detected contradiction, tiered by how central the
/// contradicted claim is (count of citations across the pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Peripheral claims.
    Low,
    /// Claims with some citation support.
    Medium,
    /// Heavily cited claims.
    High,
}

/// A detected conflict between two findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Contradiction identifier.
    pub id: Uuid,
    /// Human-readable description.
    pub description: String,
    /// First finding in the pair.
    pub finding_a: Uuid,
    /// Second finding in the pair.
    pub finding_b: Uuid,
    /// Claim-text similarity that triggered the pairing.
    pub similarity: f32,
    /// Severity tier.
    pub severity: Severity,
}

/// Output of the correlation phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Deduplicated graph nodes.
    pub graph_nodes: Vec<GraphNode>,
    /// Graph relationships.
    pub graph_relationships: Vec<GraphRelationship>,
    /// Chronological timeline.
    pub timeline: Vec<TimelineEvent>,
    /// Detected contradictions.
    pub contradictions: Vec<Contradiction>,
    /// Recurring-pattern descriptions.
    pub key_patterns: Vec<String>,
}

/// Runs correlation over all findings of a research run.
///
/// # Errors
///
/// Returns an error if claim-text embedding fails during contradiction
/// detection.
pub fn correlate(
    case_id: Uuid,
    findings: &[Finding],
    embedder: &dyn Embedder,
) -> Result<CorrelationResult> {
    let contradictions = detect_contradictions(findings, embedder)?;
    let (graph_nodes, graph_relationships) = build_graph(case_id, findings, &contradictions);
    let timeline = assemble_timeline(case_id, findings);
    let key_patterns = detect_patterns(findings, &timeline);

    info!(
        nodes = graph_nodes.len(),
        relationships = graph_relationships.len(),
        timeline = timeline.len(),
        contradictions = contradictions.len(),
        patterns = key_patterns.len(),
        "correlation complete"
    );

    Ok(CorrelationResult {
        graph_nodes,
        graph_relationships,
        timeline,
        contradictions,
        key_patterns,
    })
}

/// Canonicalizes an entity label for deduplication: trim, collapse
/// whitespace, strip honorifics, lowercase.
fn canonical_label(label: &str) -> String {
    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = collapsed.to_lowercase();
    for title in ["mr. ", "mr ", "ms. ", "ms ", "mrs. ", "mrs ", "dr. ", "dr "] {
        if let Some(stripped) = lower.strip_prefix(title) {
            return stripped.to_string();
        }
    }
    lower
}

/// Infers a node type from an entity label.
fn infer_node_type(label: &str) -> NodeType {
    let lower = label.to_lowercase();
    if ["inc", "llc", "corp", "ltd", "co.", "company", "corporation", "partners", "group"]
        .iter()
        .any(|marker| lower.split_whitespace().any(|w| w.trim_end_matches('.') == *marker))
    {
        return NodeType::Organization;
    }
    if lower.ends_with(".pdf") || lower.ends_with(".docx") || lower.contains("exhibit") {
        return NodeType::Document;
    }
    if lower.starts_with("at ") || lower.contains("office") || lower.contains("court of") {
        return NodeType::Location;
    }
    NodeType::Person
}

/// Builds the deduplicated knowledge graph from findings.
///
/// Each confirmed contradiction also becomes a `contradicts` edge
/// between the nodes standing in for the two claims (the cited
/// evidence document, the event node, or the first entity, in that
/// preference order).
fn build_graph(
    case_id: Uuid,
    findings: &[Finding],
    contradictions: &[Contradiction],
) -> (Vec<GraphNode>, Vec<GraphRelationship>) {
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut node_index: HashMap<(NodeType, String), Uuid> = HashMap::new();
    let mut relationships: Vec<GraphRelationship> = Vec::new();
    let mut seen_edges: HashSet<(Uuid, Uuid, RelationshipType)> = HashSet::new();
    let mut representatives: HashMap<Uuid, Uuid> = HashMap::new();

    let mut intern = |nodes: &mut Vec<GraphNode>,
                      node_type: NodeType,
                      label: &str|
     -> Uuid {
        let key = (node_type, canonical_label(label));
        if let Some(id) = node_index.get(&key) {
            return *id;
        }
        let node = GraphNode::new(case_id, node_type, label.trim());
        let id = node.id;
        node_index.insert(key, id);
        nodes.push(node);
        id
    };

    let mut push_edge = |relationships: &mut Vec<GraphRelationship>,
                         source: Uuid,
                         target: Uuid,
                         rel_type: RelationshipType| {
        if source != target && seen_edges.insert((source, target, rel_type)) {
            relationships.push(GraphRelationship::new(source, target, rel_type));
        }
    };

    let mut event_nodes: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = Vec::new();

    for finding in findings {
        let mut representative: Option<Uuid> = None;
        let entity_ids: Vec<Uuid> = finding
            .entities
            .iter()
            .map(|label| intern(&mut nodes, infer_node_type(label), label))
            .collect();

        // Entities co-occurring in one finding relate to each other.
        for (i, a) in entity_ids.iter().enumerate() {
            for b in &entity_ids[i + 1..] {
                push_edge(&mut relationships, *a, *b, RelationshipType::RelatedTo);
            }
        }

        // Cited evidence becomes document nodes the entities are
        // mentioned in.
        let mut cited: Vec<Uuid> = finding.citations.iter().map(|c| c.evidence_id).collect();
        cited.sort();
        cited.dedup();
        for evidence_id in cited {
            let doc_id = intern(
                &mut nodes,
                NodeType::Document,
                &format!("evidence {evidence_id}"),
            );
            if representative.is_none() {
                representative = Some(doc_id);
            }
            for entity in &entity_ids {
                push_edge(&mut relationships, *entity, doc_id, RelationshipType::MentionedIn);
            }
        }

        // Timeline findings become event nodes their participants
        // participated in.
        if finding.finding_type == FindingType::TimelineEvent {
            if let Some(at) = finding.event_time {
                let event_id = intern(&mut nodes, NodeType::Event, &finding.text);
                if representative.is_none() {
                    representative = Some(event_id);
                }
                event_nodes.push((at, event_id));
                for (entity_id, label) in entity_ids.iter().zip(&finding.entities) {
                    if infer_node_type(label) == NodeType::Person {
                        push_edge(
                            &mut relationships,
                            *entity_id,
                            event_id,
                            RelationshipType::ParticipatedIn,
                        );
                    }
                }
            }
        }

        if let Some(rep) = representative.or_else(|| entity_ids.first().copied()) {
            representatives.insert(finding.id, rep);
        }
    }

    // Chronological ordering between event nodes.
    event_nodes.sort_by_key(|(at, _)| *at);
    for pair in event_nodes.windows(2) {
        push_edge(&mut relationships, pair[0].1, pair[1].1, RelationshipType::Precedes);
    }

    // Confirmed contradictions become edges between the claims'
    // stand-in nodes, carrying severity and similarity.
    for contradiction in contradictions {
        let (Some(&a), Some(&b)) = (
            representatives.get(&contradiction.finding_a),
            representatives.get(&contradiction.finding_b),
        ) else {
            continue;
        };
        if a != b && seen_edges.insert((a, b, RelationshipType::Contradicts)) {
            let mut rel = GraphRelationship::new(a, b, RelationshipType::Contradicts);
            rel.properties.insert(
                "severity".to_string(),
                serde_json::json!(contradiction.severity),
            );
            rel.properties.insert(
                "similarity".to_string(),
                serde_json::json!(contradiction.similarity),
            );
            relationships.push(rel);
        }
    }

    (nodes, relationships)
}

/// Collects timeline findings into sorted events.
fn assemble_timeline(case_id: Uuid, findings: &[Finding]) -> Vec<TimelineEvent> {
    let mut events: Vec<TimelineEvent> = findings
        .iter()
        .filter(|f| f.finding_type == FindingType::TimelineEvent)
        .filter_map(|f| {
            f.event_time.map(|at| {
                let mut event = TimelineEvent::new(case_id, at, "event", &f.text);
                event.participants = f.entities.clone();
                event.source_citations = f.citations.clone();
                event
            })
        })
        .collect();
    crate::core::sort_chronologically(&mut events);
    events
}

/// Extracted predicate features used to decide incompatibility.
fn date_tokens(text: &str) -> Vec<String> {
    use std::sync::LazyLock;
    static DATE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(
            r"(?ix)
            \b\d{4}-\d{2}-\d{2}\b
            | \b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\s+\d{1,2}(?:,?\s+\d{4})?\b
            | \b\d{1,2}/\d{1,2}/\d{2,4}\b
        ",
        )
        .unwrap_or_else(|_| unreachable!())
    });
    DATE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn negation_polarity(text: &str) -> bool {
    const NEGATIONS: [&str; 10] = [
        "not", "never", "no", "denied", "denies", "didn't", "wasn't", "isn't", "without", "refused",
    ];
    let count = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| NEGATIONS.contains(w))
        .count();
    count % 2 == 1
}

/// Two near-equivalent claims are contradictory when they assert
/// incompatible predicates: different dates, or opposite polarity.
fn predicates_incompatible(a: &Finding, b: &Finding) -> bool {
    let dates_a = date_tokens(&a.text);
    let dates_b = date_tokens(&b.text);
    if !dates_a.is_empty() && !dates_b.is_empty() && dates_a != dates_b {
        return true;
    }
    negation_polarity(&a.text) != negation_polarity(&b.text)
}

fn severity_for(a: &Finding, b: &Finding) -> Severity {
    match a.citations.len() + b.citations.len() {
        n if n >= 4 => Severity::High,
        n if n >= 2 => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Detects contradictions between entity-overlapping finding pairs.
fn detect_contradictions(
    findings: &[Finding],
    embedder: &dyn Embedder,
) -> Result<Vec<Contradiction>> {
    let entity_sets: Vec<HashSet<String>> = findings
        .iter()
        .map(|f| f.entities.iter().map(|e| canonical_label(e)).collect())
        .collect();

    let embeddings: Vec<Vec<f32>> = findings
        .iter()
        .map(|f| embedder.embed(&f.text))
        .collect::<Result<_>>()?;

    let mut contradictions = Vec::new();
    for i in 0..findings.len() {
        for j in i + 1..findings.len() {
            if entity_sets[i].is_disjoint(&entity_sets[j]) {
                continue;
            }
            let similarity = cosine_similarity(&embeddings[i], &embeddings[j]);
            if similarity < CONTRADICTION_SIMILARITY_THRESHOLD {
                continue;
            }
            let (a, b) = (&findings[i], &findings[j]);
            if !predicates_incompatible(a, b) {
                continue;
            }
            contradictions.push(Contradiction {
                id: Uuid::new_v4(),
                description: format!(
                    "conflicting claims: \"{}\" vs \"{}\"",
                    truncate(&a.text, 80),
                    truncate(&b.text, 80)
                ),
                finding_a: a.id,
                finding_b: b.id,
                similarity,
                severity: severity_for(a, b),
            });
        }
    }
    Ok(contradictions)
}

/// Aggregates findings into recurring-pattern descriptions.
fn detect_patterns(findings: &[Finding], timeline: &[TimelineEvent]) -> Vec<String> {
    let mut patterns = Vec::new();

    // Type frequency patterns.
    let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
    for finding in findings {
        *by_type.entry(finding.finding_type.as_str()).or_insert(0) += 1;
    }
    for (finding_type, count) in by_type {
        if count >= 2 {
            patterns.push(format!(
                "multiple {finding_type} findings detected ({count} instances)"
            ));
        }
    }

    // Temporal clusters: events packed within the cluster window.
    let window = Duration::hours(CLUSTER_WINDOW_HOURS);
    let mut cluster_start = 0;
    for i in 1..=timeline.len() {
        let closes_cluster = i == timeline.len()
            || timeline[i].timestamp - timeline[cluster_start].timestamp > window;
        if closes_cluster {
            let size = i - cluster_start;
            if size >= 2 {
                patterns.push(format!(
                    "{size} events clustered within {CLUSTER_WINDOW_HOURS}h of {}",
                    timeline[cluster_start].timestamp.format("%Y-%m-%d")
                ));
            }
            cluster_start = i;
        }
    }

    // Recurring participants across events.
    let mut participant_counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in timeline {
        for participant in &event.participants {
            *participant_counts.entry(canonical_label(participant)).or_insert(0) += 1;
        }
    }
    for (participant, count) in participant_counts {
        if count >= 2 {
            patterns.push(format!(
                "\"{participant}\" appears in {count} timeline events"
            ));
        }
    }

    patterns
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FallbackEmbedder;
    use chrono::{TimeZone, Utc};

    fn finding(
        run: Uuid,
        ftype: FindingType,
        text: &str,
        entities: &[&str],
    ) -> Finding {
        Finding::new(run, ftype, text, 0.8, 0.8)
            .unwrap()
            .with_entities(entities.iter().map(ToString::to_string).collect())
    }

    fn embedder() -> FallbackEmbedder {
        FallbackEmbedder::new(128)
    }

    #[test]
    fn test_graph_dedupes_entities_case_insensitively() {
        let run = Uuid::new_v4();
        let case = Uuid::new_v4();
        let findings = vec![
            finding(run, FindingType::Fact, "payment sent", &["John Doe", "Acme Corp"]),
            finding(run, FindingType::Fact, "meeting held", &["john doe", "Jane Smith"]),
        ];
        let (nodes, rels) = build_graph(case, &findings, &[]);
        let people: Vec<&GraphNode> = nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Person)
            .collect();
        // "John Doe" and "john doe" collapse to one node.
        assert_eq!(people.len(), 2);
        assert!(nodes.iter().any(|n| n.node_type == NodeType::Organization));
        assert!(!rels.is_empty());
    }

    #[test]
    fn test_graph_alias_strips_honorifics() {
        assert_eq!(canonical_label("Mr. John Doe"), canonical_label("john  doe"));
        assert_eq!(canonical_label("Dr. Smith"), "smith");
    }

    #[test]
    fn test_node_type_inference() {
        assert_eq!(infer_node_type("Acme Corp"), NodeType::Organization);
        assert_eq!(infer_node_type("Northwind LLC"), NodeType::Organization);
        assert_eq!(infer_node_type("exhibit-a.pdf"), NodeType::Document);
        assert_eq!(infer_node_type("John Doe"), NodeType::Person);
    }

    #[test]
    fn test_timeline_events_build_participation_and_precedence() {
        let run = Uuid::new_v4();
        let case = Uuid::new_v4();
        let t = |d: u32| Utc.with_ymd_and_hms(2024, 1, d, 10, 0, 0).single().unwrap();
        let findings = vec![
            finding(run, FindingType::TimelineEvent, "contract signing", &["John Doe"])
                .with_event_time(t(15)),
            finding(run, FindingType::TimelineEvent, "wire transfer", &["John Doe"])
                .with_event_time(t(20)),
        ];
        let (nodes, rels) = build_graph(case, &findings, &[]);
        assert_eq!(
            nodes.iter().filter(|n| n.node_type == NodeType::Event).count(),
            2
        );
        assert!(rels.iter().any(|r| r.rel_type == RelationshipType::ParticipatedIn));
        assert!(rels.iter().any(|r| r.rel_type == RelationshipType::Precedes));
    }

    #[test]
    fn test_timeline_sorted() {
        let run = Uuid::new_v4();
        let case = Uuid::new_v4();
        let t = |d: u32| Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).single().unwrap();
        let findings = vec![
            finding(run, FindingType::TimelineEvent, "later event", &[]).with_event_time(t(20)),
            finding(run, FindingType::TimelineEvent, "earlier event", &[]).with_event_time(t(5)),
            // No timestamp: excluded from the timeline.
            finding(run, FindingType::TimelineEvent, "undated event", &[]),
        ];
        let timeline = assemble_timeline(case, &findings);
        assert_eq!(timeline.len(), 2);
        assert!(timeline[0].timestamp <= timeline[1].timestamp);
        assert_eq!(timeline[0].description, "earlier event");
    }

    #[test]
    fn test_contradiction_detected_on_polarity_flip() {
        let run = Uuid::new_v4();
        let findings = vec![
            finding(
                run,
                FindingType::Fact,
                "John Doe signed the contract on Jan 15 2024",
                &["John Doe"],
            ),
            finding(
                run,
                FindingType::Fact,
                "John Doe never signed the contract on Jan 15 2024",
                &["John Doe"],
            ),
        ];
        let contradictions = detect_contradictions(&findings, &embedder()).unwrap();
        assert_eq!(contradictions.len(), 1);
        assert!(contradictions[0].similarity >= CONTRADICTION_SIMILARITY_THRESHOLD);
        assert_eq!(contradictions[0].severity, Severity::Low);
    }

    #[test]
    fn test_contradiction_detected_on_date_mismatch() {
        let run = Uuid::new_v4();
        let findings = vec![
            finding(
                run,
                FindingType::Fact,
                "the wire transfer happened on Jan 15 2024",
                &["Acme Corp"],
            ),
            finding(
                run,
                FindingType::Fact,
                "the wire transfer happened on Jan 20 2024",
                &["Acme Corp"],
            ),
        ];
        let contradictions = detect_contradictions(&findings, &embedder()).unwrap();
        assert_eq!(contradictions.len(), 1);
    }

    #[test]
    fn test_contradiction_pairs_become_graph_edges() {
        let run = Uuid::new_v4();
        let case = Uuid::new_v4();
        let cite = |ev: Uuid| crate::core::Citation::new("c/00000", ev, 0, 4, "snip");
        let mut a = finding(
            run,
            FindingType::Fact,
            "John Doe signed the contract on Jan 15 2024",
            &["John Doe"],
        );
        a.citations = vec![cite(Uuid::new_v4())];
        let mut b = finding(
            run,
            FindingType::Fact,
            "John Doe never signed the contract on Jan 15 2024",
            &["John Doe"],
        );
        b.citations = vec![cite(Uuid::new_v4())];

        let findings = vec![a, b];
        let contradictions = detect_contradictions(&findings, &embedder()).unwrap();
        assert_eq!(contradictions.len(), 1);

        let (_, rels) = build_graph(case, &findings, &contradictions);
        let edge = rels
            .iter()
            .find(|r| r.rel_type == RelationshipType::Contradicts)
            .unwrap();
        // The edge links the two cited evidence documents and carries
        // the detection metadata.
        assert!(edge.properties.contains_key("severity"));
        assert!(edge.properties.contains_key("similarity"));
    }

    #[test]
    fn test_no_contradiction_without_entity_overlap() {
        let run = Uuid::new_v4();
        let findings = vec![
            finding(run, FindingType::Fact, "payment was never sent", &["Alice"]),
            finding(run, FindingType::Fact, "payment was sent", &["Bob"]),
        ];
        let contradictions = detect_contradictions(&findings, &embedder()).unwrap();
        assert!(contradictions.is_empty());
    }

    #[test]
    fn test_no_contradiction_for_compatible_claims() {
        let run = Uuid::new_v4();
        let findings = vec![
            finding(run, FindingType::Fact, "John attended the meeting", &["John"]),
            finding(run, FindingType::Fact, "John attended the meeting", &["John"]),
        ];
        // Identical polarity, no dates: compatible.
        let contradictions = detect_contradictions(&findings, &embedder()).unwrap();
        assert!(contradictions.is_empty());
    }

    #[test]
    fn test_severity_tiers() {
        let run = Uuid::new_v4();
        let ev = Uuid::new_v4();
        let citation = crate::core::Citation::new("c/00000", ev, 0, 4, "text");
        let mut a = finding(run, FindingType::Fact, "x", &["E"]);
        let mut b = finding(run, FindingType::Fact, "x", &["E"]);
        a.citations = vec![citation.clone(), citation.clone()];
        b.citations = vec![citation.clone(), citation];
        assert_eq!(severity_for(&a, &b), Severity::High);
        b.citations.clear();
        assert_eq!(severity_for(&a, &b), Severity::Medium);
        a.citations.clear();
        assert_eq!(severity_for(&a, &b), Severity::Low);
    }

    #[test]
    fn test_patterns_type_counts_and_clusters() {
        let run = Uuid::new_v4();
        let case = Uuid::new_v4();
        let t = |h: u32| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).single().unwrap();
        let findings = vec![
            finding(run, FindingType::Quote, "quote one", &[]),
            finding(run, FindingType::Quote, "quote two", &[]),
            finding(run, FindingType::TimelineEvent, "call", &["John Doe"]).with_event_time(t(9)),
            finding(run, FindingType::TimelineEvent, "meeting", &["John Doe"])
                .with_event_time(t(15)),
        ];
        let timeline = assemble_timeline(case, &findings);
        let patterns = detect_patterns(&findings, &timeline);

        assert!(patterns.iter().any(|p| p.contains("quote") && p.contains("2 instances")));
        assert!(patterns.iter().any(|p| p.contains("clustered within")));
        assert!(patterns.iter().any(|p| p.contains("john doe")));
    }

    #[test]
    fn test_correlate_end_to_end() {
        let run = Uuid::new_v4();
        let case = Uuid::new_v4();
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).single().unwrap();
        let cite = |ev: Uuid| crate::core::Citation::new("c/00000", ev, 0, 4, "snip");
        let mut claim = finding(run, FindingType::Fact, "contract signed Jan 15 2024", &["John Doe"]);
        claim.citations = vec![cite(Uuid::new_v4())];
        let mut counter_claim =
            finding(run, FindingType::Fact, "contract never signed Jan 15 2024", &["John Doe"]);
        counter_claim.citations = vec![cite(Uuid::new_v4())];
        let findings = vec![
            claim,
            counter_claim,
            finding(run, FindingType::TimelineEvent, "signing ceremony", &["John Doe"])
                .with_event_time(t),
        ];
        let result = correlate(case, &findings, &embedder()).unwrap();
        assert!(!result.graph_nodes.is_empty());
        assert_eq!(result.timeline.len(), 1);
        assert_eq!(result.contradictions.len(), 1);
        // The contradiction surfaces in the graph too.
        assert!(
            result
                .graph_relationships
                .iter()
                .any(|r| r.rel_type == RelationshipType::Contradicts)
        );
    }
}
