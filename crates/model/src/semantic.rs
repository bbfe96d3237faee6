use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use soliguard::finding::VulnerabilityKind;
use soliguard::graph::{HybridGraph, NodeId};
use soliguard::scorer::ChannelEmbedding;

use crate::features::sigmoid;
use crate::fusion::ChannelScore;

/// Calibrated (bias, weight) pairs for the semantic heads. The channel sees
/// token sequences only, so its heads fire on lexical patterns in source
/// order, independent of graph topology.
fn sem_head(kind: &VulnerabilityKind) -> (f64, f64) {
    match kind {
        VulnerabilityKind::Reentrancy => (-3.5, 6.0),
        VulnerabilityKind::UncheckedCall => (-3.2, 5.4),
        VulnerabilityKind::DelegateCall => (-3.2, 5.4),
        VulnerabilityKind::TimestampDependence => (-3.4, 5.2),
        VulnerabilityKind::IntegerOverflow => (-3.4, 5.2),
        VulnerabilityKind::AccessControl => (-3.4, 5.0),
        VulnerabilityKind::UnboundedLoop => (-3.3, 4.9),
        VulnerabilityKind::Other(_) => (-4.0, 4.0),
    }
}

/// Bag-of-hashed-tokens embedding per node over its label plus the labels of
/// the surrounding statements (±`context_window` in source order, same
/// function), L2-normalized.
pub fn embed(graph: &HybridGraph, dim: usize, context_window: usize) -> Vec<ChannelEmbedding> {
    let mut embeddings = vec![vec![0.0; dim]; graph.node_count()];

    for node in graph.nodes() {
        let idx = node.id.0 as usize;
        let mut counts = vec![0.0f64; dim];
        let window = context_window as i64;
        for offset in -window..=window {
            let neighbor_idx = idx as i64 + offset;
            if neighbor_idx < 0 || neighbor_idx as usize >= graph.node_count() {
                continue;
            }
            let neighbor = graph.node(NodeId(neighbor_idx as u32));
            if neighbor.function != node.function || neighbor.contract != node.contract {
                continue;
            }
            for token in tokens(&neighbor.label) {
                let mut hasher = DefaultHasher::new();
                token.hash(&mut hasher);
                counts[(hasher.finish() % dim as u64) as usize] += 1.0;
            }
        }
        let norm = counts.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm > 0.0 {
            for count in &mut counts {
                *count /= norm;
            }
        }
        embeddings[idx] = counts;
    }

    embeddings
}

fn tokens(label: &str) -> impl Iterator<Item = &str> {
    label
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .filter(|t| !t.is_empty())
}

fn has_external_call_token(label: &str) -> bool {
    label.contains(".call") || label.contains(".send(") || label.contains(".transfer(")
}

/// An `=` that is neither a comparison nor an arrow.
fn is_assignment_text(label: &str) -> bool {
    let bytes = label.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1).copied();
        if next == Some(b'=') || next == Some(b'>') {
            continue;
        }
        if matches!(prev, Some(b'=') | Some(b'<') | Some(b'>') | Some(b'!')) {
            continue;
        }
        return true;
    }
    false
}

fn has_arithmetic_token(label: &str) -> bool {
    ["+", "-", "*", "+=", "-=", "*=", "**"]
        .iter()
        .any(|op| label.contains(op))
}

/// How strongly one node's text speaks for a kind, for attention rankings.
pub(crate) fn token_relevance(kind: &VulnerabilityKind, label: &str) -> f64 {
    let hit = match kind {
        VulnerabilityKind::Reentrancy => has_external_call_token(label),
        VulnerabilityKind::UncheckedCall => {
            label.contains(".call") || label.contains(".send(")
        }
        VulnerabilityKind::DelegateCall => label.contains(".delegatecall"),
        VulnerabilityKind::TimestampDependence => {
            label.contains("block.timestamp") || tokens(label).any(|t| t == "now")
        }
        VulnerabilityKind::IntegerOverflow => {
            is_assignment_text(label) && has_arithmetic_token(label)
        }
        VulnerabilityKind::AccessControl => {
            label.contains("selfdestruct(") || label.to_lowercase().contains("owner")
        }
        VulnerabilityKind::UnboundedLoop => label.contains(".length"),
        VulnerabilityKind::Other(_) => false,
    };
    hit as u8 as f64
}

struct FunctionSeq<'a> {
    contract: String,
    function: String,
    /// Statement-backed nodes in source order.
    nodes: Vec<(&'a soliguard::graph::HybridNode, &'a str)>,
    all_text: String,
}

fn function_sequences(graph: &HybridGraph) -> Vec<FunctionSeq<'_>> {
    let mut grouped: BTreeMap<(String, String), Vec<(&soliguard::graph::HybridNode, &str)>> =
        BTreeMap::new();
    for node in graph.nodes() {
        if node.stmt.is_none() || node.flags.entry {
            continue;
        }
        let Some(function) = &node.function else {
            continue;
        };
        grouped
            .entry((node.contract.clone(), function.clone()))
            .or_default()
            .push((node, node.label.as_str()));
    }
    grouped
        .into_iter()
        .map(|((contract, function), nodes)| {
            let all_text = nodes
                .iter()
                .map(|(_, label)| *label)
                .collect::<Vec<_>>()
                .join("\n");
            FunctionSeq {
                contract,
                function,
                nodes,
                all_text,
            }
        })
        .collect()
}

/// Lexical pattern heads, one pass per function sequence.
pub fn score(graph: &HybridGraph) -> Vec<ChannelScore> {
    let mut scores = Vec::new();

    for seq in function_sequences(graph) {
        score_reentrancy(&seq, &mut scores);
        score_statement_heads(graph, &seq, &mut scores);
    }

    scores
}

fn emit(
    scores: &mut Vec<ChannelScore>,
    kind: VulnerabilityKind,
    seq: &FunctionSeq<'_>,
    fired: bool,
    mut anchors: Vec<NodeId>,
) {
    let (bias, weight) = sem_head(&kind);
    let z = bias + if fired { weight } else { 0.0 };
    anchors.sort();
    anchors.dedup();
    scores.push(ChannelScore {
        kind,
        contract: seq.contract.clone(),
        function: Some(seq.function.clone()),
        logit: z,
        probability: sigmoid(z),
        anchors,
    });
}

/// External call token followed, later in the sequence, by an assignment:
/// the lexical shadow of a state update after an interaction.
fn score_reentrancy(seq: &FunctionSeq<'_>, scores: &mut Vec<ChannelScore>) {
    let call_pos = seq
        .nodes
        .iter()
        .position(|(_, label)| has_external_call_token(label));
    let Some(call_pos) = call_pos else {
        return;
    };
    let write_pos = seq.nodes[call_pos + 1..]
        .iter()
        .position(|(_, label)| is_assignment_text(label))
        .map(|offset| call_pos + 1 + offset);

    if let Some(write_pos) = write_pos {
        emit(
            scores,
            VulnerabilityKind::Reentrancy,
            seq,
            true,
            vec![seq.nodes[call_pos].0.id, seq.nodes[write_pos].0.id],
        );
    } else {
        emit(
            scores,
            VulnerabilityKind::Reentrancy,
            seq,
            false,
            vec![seq.nodes[call_pos].0.id],
        );
    }
}

fn score_statement_heads(
    graph: &HybridGraph,
    seq: &FunctionSeq<'_>,
    scores: &mut Vec<ChannelScore>,
) {
    let has_auth_tokens =
        seq.all_text.contains("require(msg.sender") || seq.all_text.contains("onlyOwner");

    for (node, label) in &seq.nodes {
        if (label.contains(".call") || label.contains(".send("))
            && !is_assignment_text(label)
            && !label.contains("require(")
        {
            emit(
                scores,
                VulnerabilityKind::UncheckedCall,
                seq,
                true,
                vec![node.id],
            );
        }
        if label.contains(".delegatecall") {
            emit(
                scores,
                VulnerabilityKind::DelegateCall,
                seq,
                true,
                vec![node.id],
            );
        }
        if label.contains("block.timestamp") || tokens(label).any(|t| t == "now") {
            emit(
                scores,
                VulnerabilityKind::TimestampDependence,
                seq,
                true,
                vec![node.id],
            );
        }
        if !graph.checked_arithmetic
            && is_assignment_text(label)
            && has_arithmetic_token(label)
        {
            emit(
                scores,
                VulnerabilityKind::IntegerOverflow,
                seq,
                true,
                vec![node.id],
            );
        }
        if (label.contains("selfdestruct(")
            || (is_assignment_text(label) && label.to_lowercase().contains("owner")))
            && !has_auth_tokens
            && seq.function != "constructor"
        {
            emit(
                scores,
                VulnerabilityKind::AccessControl,
                seq,
                true,
                vec![node.id],
            );
        }
        if node.flags.loop_header && (label.contains(".length") || seq.all_text.contains(".length"))
        {
            emit(
                scores,
                VulnerabilityKind::UnboundedLoop,
                seq,
                true,
                vec![node.id],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soliguard::flow::analyze_flows;
    use soliguard::normalize::{normalize, NoImports};

    fn graph_for(source: &str) -> HybridGraph {
        let unit = normalize(source, None, &NoImports).unwrap();
        let flows = analyze_flows(&unit);
        soliguard::graph::build_hybrid_graph(&unit, &flows)
    }

    #[test]
    fn test_assignment_text_predicate() {
        assert!(is_assignment_text("balances[msg.sender] -= amount"));
        assert!(is_assignment_text("x = y"));
        assert!(!is_assignment_text("a == b"));
        assert!(!is_assignment_text("a >= b"));
        assert!(!is_assignment_text("mapping(address => uint)"));
    }

    #[test]
    fn test_reentrancy_pattern_requires_write_after_call() {
        let graph = graph_for(
            r#"
            contract Bank {
                mapping(address => uint) balances;
                function withdraw(uint amount) public {
                    msg.sender.call{value: amount}("");
                    balances[msg.sender] -= amount;
                }
            }
        "#,
        );
        let scores = score(&graph);
        let reentrancy = scores
            .iter()
            .find(|s| s.kind == VulnerabilityKind::Reentrancy)
            .unwrap();
        assert!(reentrancy.probability > 0.9);
        assert_eq!(reentrancy.anchors.len(), 2);

        let safe = graph_for(
            r#"
            contract Bank {
                mapping(address => uint) balances;
                function withdraw(uint amount) public {
                    balances[msg.sender] -= amount;
                    msg.sender.call{value: amount}("");
                }
            }
        "#,
        );
        let scores = score(&safe);
        let reentrancy = scores
            .iter()
            .find(|s| s.kind == VulnerabilityKind::Reentrancy)
            .unwrap();
        assert!(reentrancy.probability < 0.1);
    }

    #[test]
    fn test_embeddings_normalized_and_deterministic() {
        let graph = graph_for(
            r#"
            contract C {
                uint total;
                function bump() public { total += 1; }
            }
        "#,
        );
        let a = embed(&graph, 16, 2);
        let b = embed(&graph, 16, 2);
        assert_eq!(a, b);
        for emb in &a {
            let norm = emb.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_timestamp_token_head() {
        let graph = graph_for(
            r#"
            contract Lottery {
                uint deadline;
                function open() public view returns (bool) {
                    return block.timestamp < deadline;
                }
            }
        "#,
        );
        let scores = score(&graph);
        assert!(scores
            .iter()
            .any(|s| s.kind == VulnerabilityKind::TimestampDependence && s.probability > 0.8));
    }
}
