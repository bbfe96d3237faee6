use crate::finding::{Counterfactual, CounterfactualEdit, Finding, VulnerabilityKind};
use crate::graph::{HybridGraph, NodeId};

use super::types::{
    AnchorView, AuditorFinding, AuditorReport, DeveloperFinding, DeveloperReport, ManagerReport,
    ReportBundle, SeverityCounts, TopRisk,
};

/// Total report order: severity descending, confidence descending, first
/// anchor ascending. Node ids follow source position, so the anchor
/// tiebreaker is a source-order tiebreaker.
pub fn order_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(first_anchor(a).cmp(&first_anchor(b)))
    });
}

fn first_anchor(finding: &Finding) -> NodeId {
    finding.anchors.first().copied().unwrap_or(NodeId(u32::MAX))
}

/// Projects one finding sequence into the three audience views.
pub fn synthesize(graph: &HybridGraph, findings: &[Finding]) -> ReportBundle {
    let mut ordered = findings.to_vec();
    order_findings(&mut ordered);

    let developer = DeveloperReport {
        findings: ordered
            .iter()
            .map(|f| developer_finding(graph, f))
            .collect(),
        coverage: graph.coverage.clone(),
    };

    let auditor = AuditorReport {
        findings: ordered.iter().map(|f| auditor_finding(graph, f)).collect(),
        coverage: graph.coverage.clone(),
    };

    let counts = SeverityCounts::tally(&ordered);
    let manager = ManagerReport {
        total_findings: ordered.len(),
        counts,
        overall_risk: ordered.first().map(|f| f.severity),
        top_risks: ordered
            .iter()
            .take(3)
            .map(|f| TopRisk {
                title: f.kind.title(),
                severity: f.severity,
                confidence: f.confidence,
                contract: f.contract.clone(),
            })
            .collect(),
    };

    ReportBundle {
        developer,
        auditor,
        manager,
    }
}

fn anchor_view(graph: &HybridGraph, id: NodeId) -> AnchorView {
    let node = graph.node(id);
    AnchorView {
        node: id,
        line: node.span.start_line,
        snippet: node.label.clone(),
    }
}

fn developer_finding(graph: &HybridGraph, finding: &Finding) -> DeveloperFinding {
    let anchors: Vec<AnchorView> = finding
        .anchors
        .iter()
        .map(|&id| anchor_view(graph, id))
        .collect();
    let location = anchors
        .first()
        .map(|a| a.to_string())
        .unwrap_or_else(|| finding.contract.clone());

    let suggested_edits = match &finding.explanation.counterfactual {
        Counterfactual::Edits(edits) => edits.iter().map(|e| render_edit(graph, e)).collect(),
        Counterfactual::NotFoundWithinBudget => Vec::new(),
    };

    DeveloperFinding {
        title: finding.kind.title(),
        severity: finding.severity,
        confidence: finding.confidence,
        contract: finding.contract.clone(),
        function: finding.function.clone(),
        location,
        anchors,
        remediation: finding.kind.remediation().to_string(),
        suggested_edits,
        low_agreement: finding.flags.low_agreement,
    }
}

fn auditor_finding(graph: &HybridGraph, finding: &Finding) -> AuditorFinding {
    let top_attributions = finding
        .explanation
        .top_attributions(3)
        .iter()
        .map(|entry| {
            let view = anchor_view(graph, entry.node);
            format!("{view} ({:+.2})", entry.delta)
        })
        .collect();

    let attention_ranking = finding
        .explanation
        .attention_ranking
        .iter()
        .take(5)
        .map(|entry| {
            let view = anchor_view(graph, entry.node);
            format!("{view} (weight {:.2})", entry.weight)
        })
        .collect();

    AuditorFinding {
        title: finding.kind.title(),
        severity: finding.severity,
        confidence: finding.confidence,
        structural_confidence: finding.structural_confidence,
        semantic_confidence: finding.semantic_confidence,
        low_agreement: finding.flags.low_agreement,
        contract: finding.contract.clone(),
        function: finding.function.clone(),
        attack_vector: attack_vector(graph, finding),
        rationale: finding.explanation.rationale.clone(),
        top_attributions,
        attention_ranking,
        counterfactual_found: finding.explanation.counterfactual.found(),
    }
}

fn render_edit(graph: &HybridGraph, edit: &CounterfactualEdit) -> String {
    match edit {
        CounterfactualEdit::RemoveStatement { node, label } => {
            let line = graph.node(*node).span.start_line;
            format!("Remove `{label}` (line {line})")
        }
        CounterfactualEdit::MoveBeforeCall { node, call, label } => {
            let line = graph.node(*node).span.start_line;
            let call_line = graph.node(*call).span.start_line;
            format!("Move `{label}` (line {line}) before the external call at line {call_line}")
        }
    }
}

/// Short attack narrative for the auditor view, keyed on the finding kind
/// and its first anchor.
fn attack_vector(graph: &HybridGraph, finding: &Finding) -> String {
    let anchor = finding
        .anchors
        .first()
        .map(|&id| anchor_view(graph, id).to_string())
        .unwrap_or_else(|| finding.contract.clone());
    match &finding.kind {
        VulnerabilityKind::Reentrancy => format!(
            "An attacker contract re-enters through the external call before the \
             state update completes ({anchor}), draining funds against stale balances."
        ),
        VulnerabilityKind::IntegerOverflow => format!(
            "Crafted operands wrap the unchecked arithmetic at {anchor}, corrupting \
             accounting state."
        ),
        VulnerabilityKind::AccessControl => format!(
            "Any caller can reach the privileged state change at {anchor} without \
             authorization."
        ),
        VulnerabilityKind::UncheckedCall => format!(
            "The low-level call at {anchor} can fail silently; execution continues \
             as if it succeeded."
        ),
        VulnerabilityKind::TimestampDependence => format!(
            "A miner skews block.timestamp to steer the condition at {anchor}."
        ),
        VulnerabilityKind::DelegateCall => format!(
            "The delegatecall at {anchor} executes foreign code with this contract's \
             storage and balance."
        ),
        VulnerabilityKind::UnboundedLoop => format!(
            "Growing the iterated collection makes the loop at {anchor} exceed the \
             block gas limit, bricking the function."
        ),
        VulnerabilityKind::Other(label) => {
            format!("Suspicious pattern `{label}` anchored at {anchor}.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{ExplanationBundle, FindingFlags, Severity};

    fn stub(kind: VulnerabilityKind, confidence: f64, anchor: u32) -> Finding {
        Finding {
            severity: kind.severity(),
            kind,
            confidence,
            structural_confidence: confidence,
            semantic_confidence: confidence,
            contract: "C".into(),
            function: None,
            anchors: vec![NodeId(anchor)],
            flags: FindingFlags::default(),
            explanation: ExplanationBundle::empty(),
        }
    }

    #[test]
    fn test_order_severity_then_confidence_then_anchor() {
        let mut findings = vec![
            stub(VulnerabilityKind::TimestampDependence, 0.9, 0),
            stub(VulnerabilityKind::Reentrancy, 0.8, 5),
            stub(VulnerabilityKind::Reentrancy, 0.8, 2),
            stub(VulnerabilityKind::Reentrancy, 0.95, 9),
        ];
        order_findings(&mut findings);
        assert_eq!(findings[0].confidence, 0.95);
        assert_eq!(findings[1].anchors[0], NodeId(2));
        assert_eq!(findings[2].anchors[0], NodeId(5));
        assert_eq!(findings[3].severity, Severity::Low);
    }
}
