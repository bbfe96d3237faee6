use std::sync::Arc;

use tracing::debug;

use soliguard::error::{AnalysisError, Result};
use soliguard::finding::VulnerabilityKind;
use soliguard::graph::HybridGraph;
use soliguard::scorer::{
    Detection, HistoryProvider, ModelStore, NoHistory, NodeAttention, ScoreOutcome, ScoringState,
    ThresholdTable, VulnerabilityScorer, MAX_HISTORY_BIAS,
};

use crate::features::{
    all_features, logit, sigmoid, F_ARITH, F_DELEGATE, F_EXT_CALL, F_GUARD, F_LOOP, F_PRIVILEGED,
    F_STORAGE_READ, F_STORAGE_WRITE, F_TIMESTAMP, F_TRUST, F_UNCHECKED,
};
use crate::semantic::token_relevance;
use crate::store::CalibratedStore;
use crate::{fusion, semantic, structural};

/// Scorer knobs, mirroring `soliguard::config::ModelConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ScorerConfig {
    pub rounds: usize,
    pub embedding_dim: usize,
    pub context_window: usize,
    pub divergence_bound: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            embedding_dim: 16,
            context_window: 2,
            divergence_bound: 0.4,
        }
    }
}

/// The dual-channel scorer: structural message passing and semantic token
/// patterns, fused per candidate by softmax attention over the channel
/// logits.
pub struct DualChannelScorer {
    config: ScorerConfig,
    store: Arc<dyn ModelStore>,
    thresholds: ThresholdTable,
    history: Arc<dyn HistoryProvider>,
}

impl DualChannelScorer {
    pub fn new(
        config: ScorerConfig,
        store: Arc<dyn ModelStore>,
        thresholds: ThresholdTable,
        history: Arc<dyn HistoryProvider>,
    ) -> Self {
        Self {
            config,
            store,
            thresholds,
            history,
        }
    }

    /// Shipped parameters, default thresholds, no history.
    pub fn with_defaults() -> Self {
        Self::new(
            ScorerConfig::default(),
            Arc::new(CalibratedStore::default()),
            ThresholdTable::default(),
            Arc::new(NoHistory),
        )
    }
}

impl VulnerabilityScorer for DualChannelScorer {
    fn score(&self, graph: &HybridGraph) -> Result<ScoreOutcome> {
        if graph.is_empty() {
            return Err(AnalysisError::Scoring("empty graph".to_string()));
        }
        graph.validate().map_err(AnalysisError::Scoring)?;

        let features = all_features(graph, self.config.embedding_dim);

        // The two channels are independent up to fusion
        let ((h, structural_scores), (semantic_embeddings, semantic_scores)) = rayon::join(
            || {
                let h = structural::propagate(graph, &features, &*self.store, self.config.rounds);
                let scores = structural::score(graph, &features, &h, &*self.store);
                (h, scores)
            },
            || {
                let embeddings =
                    semantic::embed(graph, self.config.embedding_dim, self.config.context_window);
                let scores = semantic::score(graph);
                (embeddings, scores)
            },
        );

        debug!(
            structural = structural_scores.len(),
            semantic = semantic_scores.len(),
            "channel scores computed"
        );

        let mut detections = fusion::fuse(
            structural_scores,
            semantic_scores,
            self.config.divergence_bound,
        );

        // Prior findings tilt the logit within a hard bound, post-fusion
        for detection in &mut detections {
            let bias = self
                .history
                .prior_bias(&detection.contract, &detection.kind)
                .clamp(-MAX_HISTORY_BIAS, MAX_HISTORY_BIAS);
            if bias != 0.0 {
                detection.confidence =
                    sigmoid(logit(detection.confidence) + bias).clamp(0.0, 1.0);
            }
        }

        detections.retain(|d| d.confidence >= self.thresholds.get(&d.kind));
        let mut detections = fusion::merge_overlapping(detections);

        for detection in &mut detections {
            detection.node_relevance = node_relevance(graph, &features, detection);
        }

        detections.sort_by(|a, b| {
            a.anchors
                .cmp(&b.anchors)
                .then_with(|| a.kind.key().cmp(&b.kind.key()))
        });

        Ok(ScoreOutcome {
            detections,
            state: ScoringState {
                structural: h,
                semantic: semantic_embeddings,
            },
        })
    }
}

/// Which feature slots carry evidence for each kind, with their ranking
/// weight.
fn relevance_features(kind: &VulnerabilityKind) -> &'static [(usize, f64)] {
    match kind {
        VulnerabilityKind::Reentrancy => &[
            (F_EXT_CALL, 1.0),
            (F_STORAGE_WRITE, 0.8),
            (F_GUARD, 0.3),
            (F_TRUST, 0.2),
        ],
        VulnerabilityKind::UncheckedCall => &[(F_UNCHECKED, 1.0), (F_EXT_CALL, 0.6)],
        VulnerabilityKind::DelegateCall => &[(F_DELEGATE, 1.0)],
        VulnerabilityKind::TimestampDependence => &[(F_TIMESTAMP, 1.0)],
        VulnerabilityKind::IntegerOverflow => &[(F_ARITH, 1.0), (F_STORAGE_WRITE, 0.5)],
        VulnerabilityKind::AccessControl => &[(F_PRIVILEGED, 1.0), (F_STORAGE_WRITE, 0.4)],
        VulnerabilityKind::UnboundedLoop => &[(F_LOOP, 1.0), (F_STORAGE_READ, 0.4)],
        VulnerabilityKind::Other(_) => &[],
    }
}

/// Attention-weighted per-node relevance within the detection's function.
/// Weight descending, source position (node id) ascending on ties.
fn node_relevance(
    graph: &HybridGraph,
    features: &[Vec<f64>],
    detection: &Detection,
) -> Vec<NodeAttention> {
    let slots = relevance_features(&detection.kind);
    let mut ranking: Vec<NodeAttention> = graph
        .nodes()
        .iter()
        .filter(|n| {
            n.stmt.is_some()
                && !n.flags.entry
                && n.contract == detection.contract
                && n.function == detection.function
        })
        .filter_map(|n| {
            let x = &features[n.id.0 as usize];
            let structural_part: f64 = slots.iter().map(|&(slot, w)| w * x[slot]).sum();
            let semantic_part = token_relevance(&detection.kind, &n.label);
            let weight = detection.attention.structural * structural_part
                + detection.attention.semantic * semantic_part;
            (weight > 0.05).then_some(NodeAttention {
                node: n.id,
                weight,
            })
        })
        .collect();

    ranking.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.node.cmp(&b.node))
    });
    ranking.truncate(10);
    ranking
}

#[cfg(test)]
mod tests {
    use super::*;
    use soliguard::flow::analyze_flows;
    use soliguard::normalize::{normalize, NoImports};

    const BANK: &str = r#"
        pragma solidity ^0.8.0;
        contract VulnerableBank {
            mapping(address => uint) balances;

            function deposit() public payable {
                balances[msg.sender] += msg.value;
            }

            function withdraw(uint amount) public {
                require(balances[msg.sender] >= amount);
                msg.sender.call{value: amount}("");
                balances[msg.sender] -= amount;
            }
        }
    "#;

    fn graph_for(source: &str) -> HybridGraph {
        let unit = normalize(source, None, &NoImports).unwrap();
        let flows = analyze_flows(&unit);
        soliguard::graph::build_hybrid_graph(&unit, &flows)
    }

    #[test]
    fn test_reentrancy_detected_with_high_confidence() {
        let graph = graph_for(BANK);
        let outcome = DualChannelScorer::with_defaults().score(&graph).unwrap();
        let detection = outcome
            .detections
            .iter()
            .find(|d| d.kind == VulnerabilityKind::Reentrancy)
            .expect("reentrancy detection");
        assert!(detection.confidence >= 0.9, "got {}", detection.confidence);
        assert!(!detection.low_agreement);
        assert!(detection
            .anchors
            .iter()
            .any(|&a| graph.node(a).flags.external_call));
    }

    #[test]
    fn test_no_external_calls_no_reentrancy() {
        let graph = graph_for(
            r#"
            pragma solidity ^0.8.0;
            contract Ledger {
                mapping(address => uint) balances;
                function credit(address who, uint amount) public {
                    balances[who] += amount;
                }
            }
        "#,
        );
        let outcome = DualChannelScorer::with_defaults().score(&graph).unwrap();
        assert!(!outcome
            .detections
            .iter()
            .any(|d| d.kind == VulnerabilityKind::Reentrancy));
    }

    #[test]
    fn test_empty_graph_is_scoring_error() {
        let graph = graph_for("pragma solidity ^0.8.0;");
        let err = DualChannelScorer::with_defaults().score(&graph).unwrap_err();
        assert!(matches!(err, AnalysisError::Scoring(_)));
    }

    #[test]
    fn test_external_call_ranks_top_for_reentrancy() {
        let graph = graph_for(BANK);
        let outcome = DualChannelScorer::with_defaults().score(&graph).unwrap();
        let detection = outcome
            .detections
            .iter()
            .find(|d| d.kind == VulnerabilityKind::Reentrancy)
            .unwrap();
        let top = detection.node_relevance.first().expect("nonempty ranking");
        assert!(graph.node(top.node).flags.external_call);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let graph = graph_for(BANK);
        let scorer = DualChannelScorer::with_defaults();
        let a = serde_json::to_string(&scorer.score(&graph).unwrap().detections).unwrap();
        let b = serde_json::to_string(&scorer.score(&graph).unwrap().detections).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_history_bias_is_bounded() {
        struct Pushy;
        impl HistoryProvider for Pushy {
            fn prior_bias(&self, _: &str, _: &VulnerabilityKind) -> f64 {
                10.0
            }
        }
        let graph = graph_for(BANK);
        let biased = DualChannelScorer::new(
            ScorerConfig::default(),
            Arc::new(CalibratedStore::default()),
            ThresholdTable::default(),
            Arc::new(Pushy),
        );
        let baseline = DualChannelScorer::with_defaults();

        let with_bias = biased.score(&graph).unwrap();
        let without = baseline.score(&graph).unwrap();
        let b = with_bias
            .detections
            .iter()
            .find(|d| d.kind == VulnerabilityKind::Reentrancy)
            .unwrap()
            .confidence;
        let w = without
            .detections
            .iter()
            .find(|d| d.kind == VulnerabilityKind::Reentrancy)
            .unwrap()
            .confidence;
        // A huge prior shifts the logit by at most the clamp
        assert!(b > w);
        assert!(logit(b) - logit(w) <= MAX_HISTORY_BIAS + 1e-9);
    }
}
