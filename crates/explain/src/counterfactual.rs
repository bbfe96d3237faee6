use tracing::debug;

use soliguard::error::{Deadline, Result};
use soliguard::finding::{AttributionEntry, Counterfactual, CounterfactualEdit, VulnerabilityKind};
use soliguard::graph::{HybridGraph, NodeId};
use soliguard::scorer::{Detection, VulnerabilityScorer};

use crate::attribution::matching_confidence;

/// Greedy minimal-edit search: neutralize supporting statements one at a
/// time, strongest attribution first, re-scoring after each edit. Stops as
/// soon as the detection's confidence falls below its threshold; gives up
/// after `max_edits` with `NotFoundWithinBudget` (the finding stands, it
/// just has no machine-checked fix).
pub fn search(
    graph: &HybridGraph,
    scorer: &dyn VulnerabilityScorer,
    detection: &Detection,
    attributions: &[AttributionEntry],
    threshold: f64,
    max_edits: usize,
    deadline: &Deadline,
) -> Result<Counterfactual> {
    let mut supporters: Vec<AttributionEntry> = attributions
        .iter()
        .filter(|e| e.delta > 0.0)
        .copied()
        .collect();
    supporters.sort_by(|a, b| {
        b.delta
            .partial_cmp(&a.delta)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.node.cmp(&b.node))
    });

    let mut removed: Vec<NodeId> = Vec::new();
    for supporter in supporters.into_iter().take(max_edits) {
        deadline.check()?;
        removed.push(supporter.node);

        let perturbed = graph.without_nodes(&removed);
        let outcome = scorer.score(&perturbed)?;
        let remaining = matching_confidence(&outcome.detections, detection);
        debug!(edits = removed.len(), remaining, "counterfactual step");

        if remaining < threshold {
            return Ok(Counterfactual::Edits(render_edits(graph, detection, &removed)));
        }
    }

    Ok(Counterfactual::NotFoundWithinBudget)
}

/// Source-level reading of a neutralized node set. A post-call storage write
/// in a reentrancy detection reads as a reorder (the fix developers
/// actually apply); everything else reads as a removal.
fn render_edits(
    graph: &HybridGraph,
    detection: &Detection,
    removed: &[NodeId],
) -> Vec<CounterfactualEdit> {
    removed
        .iter()
        .map(|&id| {
            let node = graph.node(id);
            let prior_call = detection
                .anchors
                .iter()
                .copied()
                .filter(|&a| a < id && graph.node(a).flags.external_call)
                .max();
            match prior_call {
                Some(call)
                    if detection.kind == VulnerabilityKind::Reentrancy
                        && node.flags.storage_write =>
                {
                    CounterfactualEdit::MoveBeforeCall {
                        node: id,
                        call,
                        label: node.label.clone(),
                    }
                }
                _ => CounterfactualEdit::RemoveStatement {
                    node: id,
                    label: node.label.clone(),
                },
            }
        })
        .collect()
}
