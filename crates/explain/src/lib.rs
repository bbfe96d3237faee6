pub mod attribution;
pub mod counterfactual;
pub mod rationale;

use soliguard::error::{Deadline, Result};
use soliguard::finding::{AttentionEntry, ExplanationBundle};
use soliguard::graph::HybridGraph;
use soliguard::scorer::{Detection, VulnerabilityScorer};

/// Builds the explanation bundle for one detection. Works exclusively
/// through the scorer trait, so it explains any scorer implementation the
/// same way: perturb the graph, re-score, compare.
pub struct Explainer {
    max_counterfactual_edits: usize,
}

impl Default for Explainer {
    fn default() -> Self {
        Self {
            max_counterfactual_edits: 3,
        }
    }
}

impl Explainer {
    pub fn new(max_counterfactual_edits: usize) -> Self {
        Self {
            max_counterfactual_edits,
        }
    }

    /// `threshold` is the decision threshold for the detection's kind; the
    /// counterfactual search stops once a perturbed score falls below it.
    pub fn explain(
        &self,
        graph: &HybridGraph,
        scorer: &dyn VulnerabilityScorer,
        detection: &Detection,
        threshold: f64,
        deadline: &Deadline,
    ) -> Result<ExplanationBundle> {
        let attributions = attribution::attribute(graph, scorer, detection, deadline)?;

        // The ranking was retained by the scorer; read it verbatim
        let attention_ranking: Vec<AttentionEntry> = detection
            .node_relevance
            .iter()
            .map(|r| AttentionEntry {
                node: r.node,
                weight: r.weight,
            })
            .collect();

        let counterfactual = counterfactual::search(
            graph,
            scorer,
            detection,
            &attributions,
            threshold,
            self.max_counterfactual_edits,
            deadline,
        )?;

        let rationale = rationale::render(graph, detection, &attributions);

        Ok(ExplanationBundle {
            attributions,
            attention_ranking,
            rationale,
            counterfactual,
        })
    }
}
