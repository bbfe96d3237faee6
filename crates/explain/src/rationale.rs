use soliguard::finding::{AttributionEntry, VulnerabilityKind};
use soliguard::graph::{HybridGraph, NodeId};
use soliguard::scorer::Detection;

/// Deterministic templated rationale: one kind-specific narrative sentence
/// plus the strongest contributing statements with their deltas. Same
/// detection, same text, every run.
pub fn render(
    graph: &HybridGraph,
    detection: &Detection,
    attributions: &[AttributionEntry],
) -> String {
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
    supporters.truncate(3);

    let mut text = narrative(graph, detection);
    if !supporters.is_empty() {
        text.push_str(" Key evidence: ");
        let parts: Vec<String> = supporters
            .iter()
            .map(|e| {
                let node = graph.node(e.node);
                format!(
                    "`{}` (line {}, impact {:+.2})",
                    node.label, node.span.start_line, e.delta
                )
            })
            .collect();
        text.push_str(&parts.join("; "));
        text.push('.');
    }
    text
}

fn describe(graph: &HybridGraph, id: NodeId) -> String {
    let node = graph.node(id);
    format!("`{}` on line {}", node.label, node.span.start_line)
}

fn narrative(graph: &HybridGraph, detection: &Detection) -> String {
    let function = detection
        .function
        .clone()
        .unwrap_or_else(|| detection.contract.clone());

    match &detection.kind {
        VulnerabilityKind::Reentrancy => {
            let call = detection
                .anchors
                .iter()
                .copied()
                .find(|&a| graph.node(a).flags.external_call);
            let write = detection
                .anchors
                .iter()
                .copied()
                .find(|&a| graph.node(a).flags.storage_write);
            match (call, write) {
                (Some(call), Some(write)) => format!(
                    "Function `{function}` makes the external call {} before the state \
                     update {}; a reentrant callback executes against stale balances.",
                    describe(graph, call),
                    describe(graph, write)
                ),
                _ => format!(
                    "Function `{function}` interacts with an external contract before \
                     finalizing its own state."
                ),
            }
        }
        VulnerabilityKind::IntegerOverflow => format!(
            "Function `{function}` performs unchecked arithmetic on storage under a \
             pre-0.8 compiler, so results can wrap silently."
        ),
        VulnerabilityKind::AccessControl => format!(
            "Function `{function}` changes privileged state without an authorization \
             check on the caller."
        ),
        VulnerabilityKind::UncheckedCall => format!(
            "Function `{function}` ignores the success flag of a low-level call; a \
             failed transfer would go unnoticed."
        ),
        VulnerabilityKind::TimestampDependence => format!(
            "Function `{function}` branches on block.timestamp, which the block \
             producer can skew."
        ),
        VulnerabilityKind::DelegateCall => format!(
            "Function `{function}` delegatecalls into another contract, giving it \
             full control over this contract's storage."
        ),
        VulnerabilityKind::UnboundedLoop => format!(
            "Function `{function}` iterates over a collection whose size is not \
             bounded at call time; gas use grows with state."
        ),
        VulnerabilityKind::Other(label) => {
            format!("Function `{function}` matches the pattern `{label}`.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soliguard::flow::analyze_flows;
    use soliguard::normalize::{normalize, NoImports};
    use soliguard::scorer::VulnerabilityScorer;
    use soliguard_model::DualChannelScorer;

    #[test]
    fn test_reentrancy_rationale_names_call_and_write() {
        let unit = normalize(
            r#"
            pragma solidity ^0.8.0;
            contract VulnerableBank {
                mapping(address => uint) balances;
                function withdraw(uint amount) public {
                    require(balances[msg.sender] >= amount);
                    msg.sender.call{value: amount}("");
                    balances[msg.sender] -= amount;
                }
            }
        "#,
            None,
            &NoImports,
        )
        .unwrap();
        let flows = analyze_flows(&unit);
        let graph = soliguard::graph::build_hybrid_graph(&unit, &flows);
        let scorer = DualChannelScorer::with_defaults();
        let outcome = scorer.score(&graph).unwrap();
        let detection = outcome
            .detections
            .iter()
            .find(|d| d.kind == VulnerabilityKind::Reentrancy)
            .unwrap();

        let text = render(&graph, detection, &[]);
        assert!(text.contains("withdraw"));
        assert!(text.contains("external call"));
        assert!(text.contains("balances"));

        // Deterministic for the same inputs
        assert_eq!(text, render(&graph, detection, &[]));
    }
}
