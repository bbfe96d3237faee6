use serde::Serialize;

use crate::graph::NodeId;

/// Signed confidence delta from ablating one node: positive means the node
/// supported the detection, negative means it suppressed it.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct AttributionEntry {
    pub node: NodeId,
    pub delta: f64,
}

/// One entry of the attention ranking, highest fusion weight first.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct AttentionEntry {
    pub node: NodeId,
    pub weight: f64,
}

/// A single proposed source-level change in a counterfactual edit set.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum CounterfactualEdit {
    /// Remove the statement behind this node.
    RemoveStatement { node: NodeId, label: String },
    /// Move the statement behind `node` ahead of the external call at `call`.
    MoveBeforeCall {
        node: NodeId,
        call: NodeId,
        label: String,
    },
}

/// Result of the bounded counterfactual search. Exhausting the budget is a
/// degraded outcome, not an error: the finding is still reported.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum Counterfactual {
    Edits(Vec<CounterfactualEdit>),
    NotFoundWithinBudget,
}

impl Counterfactual {
    pub fn found(&self) -> bool {
        matches!(self, Counterfactual::Edits(_))
    }
}

/// Everything attached to a finding to justify it: perturbation attributions,
/// the retained attention ranking, a templated rationale, and the minimal
/// edit set that would clear the detection.
#[derive(Debug, Clone, Serialize)]
pub struct ExplanationBundle {
    /// Sorted by node id; one entry per perturbed node.
    pub attributions: Vec<AttributionEntry>,
    /// Sorted by weight descending, ties broken by source position ascending.
    pub attention_ranking: Vec<AttentionEntry>,
    pub rationale: String,
    pub counterfactual: Counterfactual,
}

impl ExplanationBundle {
    /// Placeholder bundle for detections not yet explained.
    pub fn empty() -> Self {
        Self {
            attributions: Vec::new(),
            attention_ranking: Vec::new(),
            rationale: String::new(),
            counterfactual: Counterfactual::NotFoundWithinBudget,
        }
    }

    /// Highest-attribution nodes, strongest supporters first.
    pub fn top_attributions(&self, n: usize) -> Vec<AttributionEntry> {
        let mut sorted = self.attributions.clone();
        sorted.sort_by(|a, b| {
            b.delta
                .partial_cmp(&a.delta)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.node.cmp(&b.node))
        });
        sorted.truncate(n);
        sorted
    }
}
