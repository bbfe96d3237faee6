use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::finding::VulnerabilityKind;
use crate::graph::{EdgeKind, HybridGraph, NodeId};

/// Fixed-size per-node embedding for one channel.
pub type ChannelEmbedding = Vec<f64>;

/// Per-node relevance after fusion, the raw material for attention rankings.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct NodeAttention {
    pub node: NodeId,
    pub weight: f64,
}

/// Softmax attention split between the two channels for one detection.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ChannelAttention {
    pub structural: f64,
    pub semantic: f64,
}

/// One flagged vulnerability, pre-explanation. The scorer reports raw
/// channel probabilities alongside the fused confidence so downstream
/// consumers can see agreement for themselves.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub kind: VulnerabilityKind,
    pub contract: String,
    pub function: Option<String>,
    /// Fused confidence, always within [0, 1].
    pub confidence: f64,
    pub structural_confidence: f64,
    pub semantic_confidence: f64,
    pub attention: ChannelAttention,
    /// Anchor nodes sorted by source position.
    pub anchors: Vec<NodeId>,
    /// Per-node fusion relevance, weight descending then node ascending.
    pub node_relevance: Vec<NodeAttention>,
    /// Channels diverged beyond the configured bound.
    pub low_agreement: bool,
}

/// Embeddings retained for the run so the explainer can reuse them without
/// re-deriving the channels.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringState {
    /// Indexed by node id.
    pub structural: Vec<ChannelEmbedding>,
    pub semantic: Vec<ChannelEmbedding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutcome {
    pub detections: Vec<Detection>,
    pub state: ScoringState,
}

/// Capability boundary between scoring and everything downstream. The
/// explainer perturbs graphs and re-scores through this trait only, so any
/// scorer implementation is explainable for free.
pub trait VulnerabilityScorer: Send + Sync {
    /// Scores a hybrid graph. Empty or structurally invalid graphs are a
    /// `Scoring` error; a graph with no vulnerable patterns returns an empty
    /// detection list.
    fn score(&self, graph: &HybridGraph) -> Result<ScoreOutcome>;
}

/// Parameters for one vulnerability head: a bias plus coefficients whose
/// interpretation belongs to the scorer implementation.
#[derive(Debug, Clone, Serialize)]
pub struct HeadParams {
    pub bias: f64,
    pub weights: Vec<f64>,
}

/// Read-only source of trained parameters. Loaded once per engine and shared
/// across runs.
pub trait ModelStore: Send + Sync {
    /// Message-passing decay for one edge kind.
    fn edge_decay(&self, kind: EdgeKind) -> f64;

    /// Head parameters for a vulnerability kind, if the store carries one.
    fn head(&self, kind: &VulnerabilityKind) -> Option<HeadParams>;
}

/// Per-kind decision thresholds. A detection below its kind's threshold is
/// dropped before merging.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdTable {
    thresholds: BTreeMap<String, f64>,
    fallback: f64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert("reentrancy".to_string(), 0.70);
        thresholds.insert("unchecked-call".to_string(), 0.60);
        thresholds.insert("access-control".to_string(), 0.65);
        thresholds.insert("integer-overflow".to_string(), 0.60);
        thresholds.insert("timestamp-dependence".to_string(), 0.55);
        thresholds.insert("delegate-call".to_string(), 0.65);
        thresholds.insert("unbounded-loop".to_string(), 0.55);
        Self {
            thresholds,
            fallback: 0.75,
        }
    }
}

impl ThresholdTable {
    pub fn get(&self, kind: &VulnerabilityKind) -> f64 {
        self.thresholds
            .get(&kind.key())
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Applies configured per-kind overrides on top of the calibrated table.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, f64>) -> Self {
        for (key, value) in overrides {
            self.thresholds.insert(key.clone(), value.clamp(0.0, 1.0));
        }
        self
    }
}

/// Upper bound on the logit bias history may contribute. Prior findings tilt
/// a score, they never decide it.
pub const MAX_HISTORY_BIAS: f64 = 0.25;

/// Optional collaborator supplying prior-finding context for a contract.
pub trait HistoryProvider: Send + Sync {
    /// Raw logit bias for this contract and kind; callers clamp it to
    /// [`MAX_HISTORY_BIAS`].
    fn prior_bias(&self, contract: &str, kind: &VulnerabilityKind) -> f64;
}

/// Provider that knows no history.
pub struct NoHistory;

impl HistoryProvider for NoHistory {
    fn prior_bias(&self, _contract: &str, _kind: &VulnerabilityKind) -> f64 {
        0.0
    }
}
