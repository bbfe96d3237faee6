use tracing::trace;

use soliguard::error::{Deadline, Result};
use soliguard::finding::AttributionEntry;
use soliguard::graph::{HybridGraph, NodeId};
use soliguard::scorer::{Detection, VulnerabilityScorer};

/// Perturbation attribution: ablate one candidate node at a time, re-score,
/// and record the signed confidence delta. Positive delta means the node
/// supported the detection. Candidates are visited in node-id order, so the
/// result is deterministic for a given graph.
pub fn attribute(
    graph: &HybridGraph,
    scorer: &dyn VulnerabilityScorer,
    detection: &Detection,
    deadline: &Deadline,
) -> Result<Vec<AttributionEntry>> {
    let mut entries = Vec::new();

    for node in candidates(graph, detection) {
        deadline.check()?;
        let ablated = graph.without_nodes(&[node]);
        let outcome = scorer.score(&ablated)?;
        let remaining = matching_confidence(&outcome.detections, detection);
        let delta = detection.confidence - remaining;
        trace!(node = %node, delta, "ablation delta");
        entries.push(AttributionEntry { node, delta });
    }

    Ok(entries)
}

/// Anchors plus the scorer's relevance nodes, deduplicated, ascending.
fn candidates(graph: &HybridGraph, detection: &Detection) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = detection.anchors.clone();
    nodes.extend(detection.node_relevance.iter().map(|r| r.node));
    nodes.retain(|&id| {
        let node = graph.node(id);
        node.stmt.is_some() && !node.flags.entry
    });
    nodes.sort();
    nodes.dedup();
    nodes
}

/// Confidence of the same logical detection in a re-scored outcome, or 0.0
/// when the perturbation removed it entirely.
pub(crate) fn matching_confidence(detections: &[Detection], original: &Detection) -> f64 {
    detections
        .iter()
        .filter(|d| {
            d.kind == original.kind
                && d.contract == original.contract
                && d.function == original.function
        })
        .map(|d| d.confidence)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use soliguard::flow::analyze_flows;
    use soliguard::normalize::{normalize, NoImports};
    use soliguard::scorer::VulnerabilityScorer;
    use soliguard_model::DualChannelScorer;
    use std::time::Duration;

    const BANK: &str = r#"
        pragma solidity ^0.8.0;
        contract VulnerableBank {
            mapping(address => uint) balances;
            function withdraw(uint amount) public {
                require(balances[msg.sender] >= amount);
                msg.sender.call{value: amount}("");
                balances[msg.sender] -= amount;
            }
        }
    "#;

    #[test]
    fn test_external_call_has_strong_positive_attribution() {
        let unit = normalize(BANK, None, &NoImports).unwrap();
        let flows = analyze_flows(&unit);
        let graph = soliguard::graph::build_hybrid_graph(&unit, &flows);
        let scorer = DualChannelScorer::with_defaults();
        let outcome = scorer.score(&graph).unwrap();
        let detection = outcome
            .detections
            .iter()
            .find(|d| d.kind == soliguard::finding::VulnerabilityKind::Reentrancy)
            .unwrap();

        let deadline = Deadline::start(Duration::from_secs(10));
        let attributions = attribute(&graph, &scorer, detection, &deadline).unwrap();

        let call = graph
            .nodes()
            .iter()
            .find(|n| n.flags.external_call)
            .unwrap()
            .id;
        let call_entry = attributions.iter().find(|e| e.node == call).unwrap();
        // Removing the call removes the detection outright
        assert!(call_entry.delta > 0.8, "got {}", call_entry.delta);

        // Deterministic order: node ids ascending
        let ids: Vec<_> = attributions.iter().map(|e| e.node).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
