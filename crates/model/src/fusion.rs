use soliguard::finding::VulnerabilityKind;
use soliguard::graph::NodeId;
use soliguard::scorer::{ChannelAttention, Detection};

/// One head activation from a single channel, pre-fusion and pre-threshold.
#[derive(Debug, Clone)]
pub struct ChannelScore {
    pub kind: VulnerabilityKind,
    pub contract: String,
    pub function: Option<String>,
    pub logit: f64,
    pub probability: f64,
    pub anchors: Vec<NodeId>,
}

impl ChannelScore {
    fn key(&self) -> (String, String, Option<String>) {
        (
            self.kind.key(),
            self.contract.clone(),
            self.function.clone(),
        )
    }
}

/// Logit assumed for a channel that stayed silent on a candidate the other
/// channel raised.
const ABSENT_LOGIT: f64 = -3.5;

/// Softmax attention over the two channel logits. The fused confidence is
/// the attention-weighted mix of the channel probabilities, so the more
/// certain channel dominates without silencing the other.
///
/// Divergence beyond `divergence_bound` degrades the fused confidence and
/// marks the detection low-agreement; it never suppresses it.
pub fn fuse(
    structural: Vec<ChannelScore>,
    semantic: Vec<ChannelScore>,
    divergence_bound: f64,
) -> Vec<Detection> {
    let mut detections = Vec::new();
    let mut semantic: Vec<Option<ChannelScore>> = semantic.into_iter().map(Some).collect();

    for s in structural {
        // Best same-key semantic partner, preferring anchor overlap
        let partner_idx = semantic
            .iter()
            .enumerate()
            .filter(|(_, m)| m.as_ref().is_some_and(|m| m.key() == s.key()))
            .max_by_key(|(_, m)| {
                m.as_ref()
                    .map(|m| m.anchors.iter().filter(|a| s.anchors.contains(a)).count())
                    .unwrap_or(0)
            })
            .map(|(idx, _)| idx);

        let (m_logit, m_prob, m_anchors) = match partner_idx.and_then(|idx| semantic[idx].take()) {
            Some(m) => (m.logit, m.probability, m.anchors),
            None => (ABSENT_LOGIT, sigmoid(ABSENT_LOGIT), Vec::new()),
        };

        detections.push(blend(s, m_logit, m_prob, m_anchors, divergence_bound));
    }

    // Semantic-only candidates: the structural channel stayed silent
    for m in semantic.into_iter().flatten() {
        let s = ChannelScore {
            kind: m.kind.clone(),
            contract: m.contract.clone(),
            function: m.function.clone(),
            logit: ABSENT_LOGIT,
            probability: sigmoid(ABSENT_LOGIT),
            anchors: Vec::new(),
        };
        let (m_logit, m_prob, m_anchors) = (m.logit, m.probability, m.anchors);
        detections.push(blend(s, m_logit, m_prob, m_anchors, divergence_bound));
    }

    detections
}

fn blend(
    s: ChannelScore,
    m_logit: f64,
    m_prob: f64,
    m_anchors: Vec<NodeId>,
    divergence_bound: f64,
) -> Detection {
    let e_s = s.logit.exp();
    let e_m = m_logit.exp();
    let alpha_s = e_s / (e_s + e_m);
    let alpha_m = 1.0 - alpha_s;

    let mut confidence = alpha_s * s.probability + alpha_m * m_prob;
    let divergence = (s.probability - m_prob).abs();
    let low_agreement = divergence > divergence_bound;
    if low_agreement {
        confidence *= 0.85;
    }

    let mut anchors = s.anchors;
    anchors.extend(m_anchors);
    anchors.sort();
    anchors.dedup();

    Detection {
        kind: s.kind,
        contract: s.contract,
        function: s.function,
        confidence: confidence.clamp(0.0, 1.0),
        structural_confidence: s.probability,
        semantic_confidence: m_prob,
        attention: ChannelAttention {
            structural: alpha_s,
            semantic: alpha_m,
        },
        anchors,
        node_relevance: Vec::new(),
        low_agreement,
    }
}

fn sigmoid(z: f64) -> f64 {
    crate::features::sigmoid(z)
}

/// Merges overlapping same-kind detections: anchor union, max confidence.
/// Two flagged subsets overlap when they share at least one anchor node.
pub fn merge_overlapping(mut detections: Vec<Detection>) -> Vec<Detection> {
    let mut merged: Vec<Detection> = Vec::new();
    // Stable order first so merging is deterministic
    detections.sort_by(|a, b| {
        a.kind
            .key()
            .cmp(&b.kind.key())
            .then(a.anchors.cmp(&b.anchors))
    });

    for detection in detections {
        let target = merged.iter_mut().find(|existing| {
            existing.kind == detection.kind
                && existing.contract == detection.contract
                && existing
                    .anchors
                    .iter()
                    .any(|a| detection.anchors.contains(a))
        });
        match target {
            Some(existing) => {
                existing.anchors.extend(detection.anchors.iter().copied());
                existing.anchors.sort();
                existing.anchors.dedup();
                if detection.confidence > existing.confidence {
                    existing.confidence = detection.confidence;
                    existing.structural_confidence = detection.structural_confidence;
                    existing.semantic_confidence = detection.semantic_confidence;
                    existing.attention = detection.attention;
                    existing.low_agreement = detection.low_agreement;
                }
            }
            None => merged.push(detection),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(kind: VulnerabilityKind, logit: f64, anchors: Vec<u32>) -> ChannelScore {
        ChannelScore {
            kind,
            contract: "C".into(),
            function: Some("f".into()),
            logit,
            probability: crate::features::sigmoid(logit),
            anchors: anchors.into_iter().map(NodeId).collect(),
        }
    }

    #[test]
    fn test_agreeing_channels_fuse_high() {
        let fused = fuse(
            vec![score(VulnerabilityKind::Reentrancy, 3.3, vec![2, 4])],
            vec![score(VulnerabilityKind::Reentrancy, 2.5, vec![2, 4])],
            0.4,
        );
        assert_eq!(fused.len(), 1);
        let d = &fused[0];
        assert!(d.confidence > 0.9);
        assert!(!d.low_agreement);
        assert!(d.attention.structural > d.attention.semantic);
        assert!((d.attention.structural + d.attention.semantic - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_divergence_degrades_but_never_suppresses() {
        let fused = fuse(
            vec![score(VulnerabilityKind::UnboundedLoop, 1.5, vec![7])],
            vec![],
            0.4,
        );
        assert_eq!(fused.len(), 1);
        let d = &fused[0];
        assert!(d.low_agreement);
        // Degraded relative to the structural channel alone, still present
        assert!(d.confidence < d.structural_confidence);
        assert!(d.confidence > 0.5);
    }

    #[test]
    fn test_confidence_stays_in_unit_interval() {
        for z in [-10.0, -1.0, 0.0, 2.0, 12.0] {
            let fused = fuse(
                vec![score(VulnerabilityKind::Reentrancy, z, vec![1])],
                vec![score(VulnerabilityKind::Reentrancy, -z, vec![1])],
                0.4,
            );
            let c = fused[0].confidence;
            assert!((0.0..=1.0).contains(&c), "confidence {c} out of range");
        }
    }

    #[test]
    fn test_merge_unions_anchors_and_keeps_max_confidence() {
        let mut a = fuse(
            vec![score(VulnerabilityKind::Reentrancy, 3.3, vec![2, 4])],
            vec![],
            1.0,
        );
        let b = fuse(
            vec![score(VulnerabilityKind::Reentrancy, 1.0, vec![4, 6])],
            vec![],
            1.0,
        );
        let max_confidence = a[0].confidence.max(b[0].confidence);
        a.extend(b);
        let merged = merge_overlapping(a);
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].anchors,
            vec![NodeId(2), NodeId(4), NodeId(6)]
        );
        assert_eq!(merged[0].confidence, max_confidence);
    }

    #[test]
    fn test_disjoint_same_kind_detections_stay_separate() {
        let mut a = fuse(
            vec![score(VulnerabilityKind::TimestampDependence, 1.8, vec![1])],
            vec![],
            1.0,
        );
        a.extend(fuse(
            vec![score(VulnerabilityKind::TimestampDependence, 1.8, vec![9])],
            vec![],
            1.0,
        ));
        let merged = merge_overlapping(a);
        assert_eq!(merged.len(), 2);
    }
}
