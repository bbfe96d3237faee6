use soliguard::finding::VulnerabilityKind;
use soliguard::graph::{EdgeKind, HybridGraph, NodeId, NodeKind};
use soliguard::scorer::{ChannelEmbedding, ModelStore};

use crate::features::{sigmoid, F_EXT_CALL, F_STORAGE_WRITE, F_TRUST};
use crate::fusion::ChannelScore;

/// Edge-kind-aware message passing. Each round every node adds, per edge
/// kind, the decayed average of its in-neighbors' vectors to its own, so
/// evidence flows along control and data paths while slot meaning stays
/// fixed.
pub fn propagate(
    graph: &HybridGraph,
    features: &[ChannelEmbedding],
    store: &dyn ModelStore,
    rounds: usize,
) -> Vec<ChannelEmbedding> {
    let mut h: Vec<ChannelEmbedding> = features.to_vec();
    let kinds = [
        EdgeKind::Syntactic,
        EdgeKind::ControlFlow,
        EdgeKind::DataDependency,
    ];

    for _ in 0..rounds {
        let mut next = h.clone();
        for node in graph.nodes() {
            let idx = node.id.0 as usize;
            for kind in kinds {
                let decay = store.edge_decay(kind);
                if decay == 0.0 {
                    continue;
                }
                let neighbors: Vec<NodeId> = graph.incoming(node.id, kind).collect();
                if neighbors.is_empty() {
                    continue;
                }
                let scale = decay / neighbors.len() as f64;
                for neighbor in neighbors {
                    let source = &h[neighbor.0 as usize];
                    for (slot, value) in source.iter().enumerate() {
                        next[idx][slot] += scale * value;
                    }
                }
            }
        }
        h = next;
    }
    h
}

/// Runs every calibrated head over the propagated embeddings. Candidates are
/// selected by their own flags; the head weighs the evidence that message
/// passing pulled into them.
pub fn score(
    graph: &HybridGraph,
    features: &[ChannelEmbedding],
    h: &[ChannelEmbedding],
    store: &dyn ModelStore,
) -> Vec<ChannelScore> {
    let mut scores = Vec::new();

    for node in graph.nodes() {
        let idx = node.id.0 as usize;
        let flags = &node.flags;
        if flags.entry {
            continue;
        }

        if flags.storage_write && node.crosses_trust_boundary {
            if let Some(head) = store.head(&VulnerabilityKind::Reentrancy) {
                // Call evidence propagated into the write node, saturated at 1
                let call_evidence = h[idx][F_EXT_CALL].min(1.0);
                let z = head.bias
                    + head.weights[0] * features[idx][F_STORAGE_WRITE] * call_evidence
                    + head.weights[1] * features[idx][F_TRUST];
                let mut anchors = call_ancestors(graph, node.id);
                anchors.push(node.id);
                anchors.sort();
                anchors.dedup();
                scores.push(ChannelScore {
                    kind: VulnerabilityKind::Reentrancy,
                    contract: node.contract.clone(),
                    function: node.function.clone(),
                    logit: z,
                    probability: sigmoid(z),
                    anchors,
                });
            }
        }

        if flags.unchecked_call {
            push_unary(&mut scores, store, VulnerabilityKind::UncheckedCall, node.id, graph);
        }
        if flags.delegatecall {
            push_unary(&mut scores, store, VulnerabilityKind::DelegateCall, node.id, graph);
        }
        if flags.timestamp_read {
            push_unary(
                &mut scores,
                store,
                VulnerabilityKind::TimestampDependence,
                node.id,
                graph,
            );
        }
        if flags.unbounded_loop {
            push_unary(&mut scores, store, VulnerabilityKind::UnboundedLoop, node.id, graph);
        }
        if flags.arithmetic && flags.storage_write && !graph.checked_arithmetic {
            push_unary(
                &mut scores,
                store,
                VulnerabilityKind::IntegerOverflow,
                node.id,
                graph,
            );
        }
        // Constructors are expected to set privileged state
        if flags.privileged
            && node.function.as_deref() != Some("constructor")
            && !function_guarded(graph, node.id)
        {
            push_unary(&mut scores, store, VulnerabilityKind::AccessControl, node.id, graph);
        }
    }

    scores
}

/// Heads whose evidence is the candidate node's own flag.
fn push_unary(
    scores: &mut Vec<ChannelScore>,
    store: &dyn ModelStore,
    kind: VulnerabilityKind,
    id: NodeId,
    graph: &HybridGraph,
) {
    let Some(head) = store.head(&kind) else {
        return;
    };
    let node = graph.node(id);
    let z = head.bias + head.weights[0];
    scores.push(ChannelScore {
        kind,
        contract: node.contract.clone(),
        function: node.function.clone(),
        logit: z,
        probability: sigmoid(z),
        anchors: vec![id],
    });
}

/// External call sites that are control ancestors of the given node within
/// its function.
fn call_ancestors(graph: &HybridGraph, id: NodeId) -> Vec<NodeId> {
    let function = graph.node(id).function.clone();
    let mut seen = std::collections::BTreeSet::new();
    let mut stack = vec![id];
    let mut calls = Vec::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        for pred in graph.incoming(current, EdgeKind::ControlFlow) {
            let node = graph.node(pred);
            if node.function != function {
                continue;
            }
            if node.flags.external_call {
                calls.push(pred);
            }
            if !seen.contains(&pred) {
                stack.push(pred);
            }
        }
    }
    calls
}

/// True when the enclosing function carries at least one modifier.
fn function_guarded(graph: &HybridGraph, id: NodeId) -> bool {
    let node = graph.node(id);
    let Some(function) = &node.function else {
        return false;
    };
    graph.nodes().iter().any(|n| {
        n.kind == NodeKind::Function
            && n.flags.modifier_guarded
            && n.contract == node.contract
            && n.function.as_deref() == Some(function)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::all_features;
    use crate::store::CalibratedStore;
    use soliguard::flow::analyze_flows;
    use soliguard::normalize::{normalize, NoImports};

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

    fn scored(source: &str) -> (HybridGraph, Vec<ChannelScore>) {
        let unit = normalize(source, None, &NoImports).unwrap();
        let flows = analyze_flows(&unit);
        let graph = soliguard::graph::build_hybrid_graph(&unit, &flows);
        let store = CalibratedStore::default();
        let features = all_features(&graph, 16);
        let h = propagate(&graph, &features, &store, 3);
        let scores = score(&graph, &features, &h, &store);
        (graph, scores)
    }

    #[test]
    fn test_reentrancy_head_fires_on_post_call_write() {
        let (graph, scores) = scored(BANK);
        let reentrancy = scores
            .iter()
            .find(|s| s.kind == VulnerabilityKind::Reentrancy)
            .expect("reentrancy head activation");
        assert!(reentrancy.probability > 0.9, "got {}", reentrancy.probability);
        // Anchors include the call site itself
        assert!(reentrancy
            .anchors
            .iter()
            .any(|&a| graph.node(a).flags.external_call));
    }

    #[test]
    fn test_reentrancy_head_quiet_after_call_ablation() {
        let unit = normalize(BANK, None, &NoImports).unwrap();
        let flows = analyze_flows(&unit);
        let graph = soliguard::graph::build_hybrid_graph(&unit, &flows);
        let call = graph
            .nodes()
            .iter()
            .find(|n| n.flags.external_call)
            .unwrap()
            .id;
        let ablated = graph.without_nodes(&[call]);

        let store = CalibratedStore::default();
        let features = all_features(&ablated, 16);
        let h = propagate(&ablated, &features, &store, 3);
        let scores = score(&ablated, &features, &h, &store);
        let reentrancy = scores
            .iter()
            .filter(|s| s.kind == VulnerabilityKind::Reentrancy)
            .map(|s| s.probability)
            .fold(0.0f64, f64::max);
        assert!(reentrancy < 0.1, "got {reentrancy}");
    }

    #[test]
    fn test_write_before_call_scores_low() {
        let (_, scores) = scored(
            r#"
            pragma solidity ^0.8.0;
            contract SafeBank {
                mapping(address => uint) balances;
                function withdraw(uint amount) public {
                    require(balances[msg.sender] >= amount);
                    balances[msg.sender] -= amount;
                    msg.sender.call{value: amount}("");
                }
            }
        "#,
        );
        let best = scores
            .iter()
            .filter(|s| s.kind == VulnerabilityKind::Reentrancy)
            .map(|s| s.probability)
            .fold(0.0f64, f64::max);
        // No call evidence flows into a write that precedes the call
        assert!(best < 0.5, "got {best}");
    }

    #[test]
    fn test_overflow_head_respects_checked_arithmetic() {
        let unchecked = r#"
            pragma solidity ^0.7.6;
            contract Counter {
                uint total;
                function add(uint v) public { total += v; }
            }
        "#;
        let (_, scores) = scored(unchecked);
        assert!(scores
            .iter()
            .any(|s| s.kind == VulnerabilityKind::IntegerOverflow));

        let checked = unchecked.replace("0.7.6", "0.8.19");
        let (_, scores) = scored(&checked);
        assert!(!scores
            .iter()
            .any(|s| s.kind == VulnerabilityKind::IntegerOverflow));
    }
}
