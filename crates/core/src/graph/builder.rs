use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::ast::{ContractKind, SourceSpan};
use crate::flow::{ControlEdgeKind, FlowArtifacts, StmtId, StmtRole};
use crate::normalize::CanonicalUnit;

use super::hybrid::{
    EdgeKind, HybridEdge, HybridGraph, HybridNode, NodeFlags, NodeId, NodeKind, Origin,
};

/// Merge AST, CFG and DFG into one enriched [`HybridGraph`].
///
/// Deterministic: node order follows source position (ties broken by kind
/// then label), edge order is (kind, source, target). Running twice on the
/// same inputs yields identical orderings.
pub fn build_hybrid_graph(unit: &CanonicalUnit, flows: &FlowArtifacts) -> HybridGraph {
    let mut pending: Vec<PendingNode> = Vec::new();

    // Function nodes
    for contract in &unit.contracts {
        if contract.kind == ContractKind::Interface {
            continue;
        }
        for func in &contract.functions {
            if flows.cfg.function(&contract.name, &func.name).is_none() {
                continue;
            }
            let signature = unit
                .symbols
                .get(&format!("{}::{}", contract.name, func.name))
                .map(|s| s.type_text.clone())
                .unwrap_or_default();
            pending.push(PendingNode {
                kind: NodeKind::Function,
                label: format!("{}.{}", contract.name, func.name),
                type_signature: signature,
                contract: contract.name.clone(),
                function: Some(func.name.clone()),
                span: func.span,
                origin: Origin {
                    ast: true,
                    ..Origin::default()
                },
                stmt: None,
                flags: NodeFlags {
                    modifier_guarded: !func.modifiers.is_empty(),
                    ..NodeFlags::default()
                },
                key: NodeKey::Function(contract.name.clone(), func.name.clone()),
            });
        }

        // State variable nodes
        for var in &contract.state_vars {
            pending.push(PendingNode {
                kind: NodeKind::Variable,
                label: var.name.clone(),
                type_signature: var.type_name.text.clone(),
                contract: contract.name.clone(),
                function: None,
                span: var.span,
                origin: Origin {
                    ast: true,
                    dfg: true,
                    ..Origin::default()
                },
                stmt: None,
                flags: NodeFlags::default(),
                key: NodeKey::Variable(contract.name.clone(), var.name.clone()),
            });
        }
    }

    // Statement nodes, one per arena entry
    let dfg_participants: BTreeSet<StmtId> = flows
        .dfg
        .edges
        .iter()
        .flat_map(|(d, u, _)| [*d, *u])
        .collect();

    for node in flows.arena.iter() {
        let facts = &node.facts;
        let is_call_site = facts.external_calls().next().is_some();
        let flags = NodeFlags {
            entry: facts.role == StmtRole::Entry,
            branch: facts.role == StmtRole::Branch,
            guard: facts.role == StmtRole::Guard,
            loop_header: facts.role == StmtRole::LoopHeader,
            storage_write: facts.writes_storage(),
            storage_read: facts.reads_storage(),
            arithmetic: facts.has_arithmetic,
            external_call: is_call_site,
            value_transfer: facts.calls.iter().any(|c| c.transfers_value),
            delegatecall: facts.calls.iter().any(|c| c.is_delegatecall),
            timestamp_read: facts.reads_timestamp,
            unchecked_call: facts
                .external_calls()
                .any(|c| c.is_low_level && !c.result_used),
            privileged: facts.calls.iter().any(|c| c.callee == "selfdestruct")
                || facts.writes.iter().any(|w| {
                    w.is_storage
                        && !w.is_weak
                        && (w.name.to_lowercase().contains("owner")
                            || w.name.to_lowercase().contains("admin"))
                }),
            unbounded_loop: facts.role == StmtRole::LoopHeader
                && (facts.reads_storage() || facts.reads.is_empty()),
            modifier_guarded: false,
            unsupported: matches!(facts.role, StmtRole::Unsupported(_)),
        };
        let type_signature = facts
            .external_calls()
            .next()
            .map(|c| {
                if c.transfers_value {
                    format!("{}{{value}}()", c.callee)
                } else {
                    format!("{}()", c.callee)
                }
            })
            .unwrap_or_default();
        pending.push(PendingNode {
            kind: if is_call_site {
                NodeKind::ExternalCallSite
            } else {
                NodeKind::Statement
            },
            label: facts.text.clone(),
            type_signature,
            contract: node.contract.clone(),
            function: Some(node.function.clone()),
            span: node.span,
            origin: Origin {
                ast: true,
                cfg: true,
                dfg: dfg_participants.contains(&node.id),
            },
            stmt: Some(node.id),
            flags,
            key: NodeKey::Stmt(node.id),
        });
    }

    // Stable ordering: source position, then kind, then label
    pending.sort_by(|a, b| {
        (a.span, kind_rank(a.kind), &a.label).cmp(&(b.span, kind_rank(b.kind), &b.label))
    });

    let mut stmt_index: HashMap<StmtId, NodeId> = HashMap::new();
    let mut var_index: HashMap<(String, String), NodeId> = HashMap::new();
    let mut func_index: HashMap<(String, String), NodeId> = HashMap::new();
    let mut nodes = Vec::with_capacity(pending.len());

    for (idx, p) in pending.into_iter().enumerate() {
        let id = NodeId(idx as u32);
        match &p.key {
            NodeKey::Stmt(stmt) => {
                stmt_index.insert(*stmt, id);
            }
            NodeKey::Variable(contract, name) => {
                var_index.insert((contract.clone(), name.clone()), id);
            }
            NodeKey::Function(contract, name) => {
                func_index.insert((contract.clone(), name.clone()), id);
            }
        }
        nodes.push(HybridNode {
            id,
            kind: p.kind,
            label: p.label,
            type_signature: p.type_signature,
            contract: p.contract,
            function: p.function,
            span: p.span,
            origin: p.origin,
            stmt: p.stmt,
            flags: p.flags,
            crosses_trust_boundary: false,
        });
    }

    let mut edges = Vec::new();

    // Syntactic containment: function -> its statements
    for func in &flows.cfg.functions {
        let Some(&func_node) = func_index
            .get(&(func.contract.clone(), func.name.clone()))
        else {
            continue;
        };
        for stmt in &func.statements {
            if let Some(&stmt_node) = stmt_index.get(stmt) {
                edges.push(HybridEdge {
                    kind: EdgeKind::Syntactic,
                    source: func_node,
                    target: stmt_node,
                    weight: None,
                });
            }
        }
    }

    // Syntactic references + data links between statements and state vars
    for node in flows.arena.iter() {
        let Some(&stmt_node) = stmt_index.get(&node.id) else {
            continue;
        };
        for write in &node.facts.writes {
            if !write.is_storage {
                continue;
            }
            if let Some(&var_node) = var_index.get(&(node.contract.clone(), write.name.clone())) {
                edges.push(HybridEdge {
                    kind: EdgeKind::Syntactic,
                    source: stmt_node,
                    target: var_node,
                    weight: None,
                });
                edges.push(HybridEdge {
                    kind: EdgeKind::DataDependency,
                    source: stmt_node,
                    target: var_node,
                    weight: None,
                });
            }
        }
        for read in &node.facts.reads {
            if !read.is_storage {
                continue;
            }
            if let Some(&var_node) = var_index.get(&(node.contract.clone(), read.name.clone())) {
                edges.push(HybridEdge {
                    kind: EdgeKind::Syntactic,
                    source: stmt_node,
                    target: var_node,
                    weight: None,
                });
                edges.push(HybridEdge {
                    kind: EdgeKind::DataDependency,
                    source: var_node,
                    target: stmt_node,
                    weight: None,
                });
            }
        }
    }

    // Control-flow edges (including cross-function call edges)
    for (from, to, kind) in &flows.cfg.edges {
        if let (Some(&a), Some(&b)) = (stmt_index.get(from), stmt_index.get(to)) {
            edges.push(HybridEdge {
                kind: EdgeKind::ControlFlow,
                source: a,
                target: b,
                weight: Some(match kind {
                    ControlEdgeKind::LoopBack => 0.5,
                    _ => 1.0,
                }),
            });
        }
    }

    // Def-use edges
    for (def, use_site, _) in &flows.dfg.edges {
        if let (Some(&a), Some(&b)) = (stmt_index.get(def), stmt_index.get(use_site)) {
            edges.push(HybridEdge {
                kind: EdgeKind::DataDependency,
                source: a,
                target: b,
                weight: None,
            });
        }
    }

    let mut graph = HybridGraph::from_parts(
        nodes,
        edges,
        unit.checked_arithmetic(),
        flows.coverage.clone(),
    );
    mark_trust_boundaries(&mut graph);

    debug!(
        nodes = graph.node_count(),
        edges = graph.edges().len(),
        "hybrid graph built"
    );
    graph
}

fn kind_rank(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::Function => 0,
        NodeKind::Variable => 1,
        NodeKind::Statement => 2,
        NodeKind::ExternalCallSite => 2,
    }
}

struct PendingNode {
    kind: NodeKind,
    label: String,
    type_signature: String,
    contract: String,
    function: Option<String>,
    span: SourceSpan,
    origin: Origin,
    stmt: Option<StmtId>,
    flags: NodeFlags,
    key: NodeKey,
}

enum NodeKey {
    Stmt(StmtId),
    Variable(String, String),
    Function(String, String),
}

/// Mark every node reachable from or leading to an external call site over
/// control and data edges as crossing a trust boundary.
fn mark_trust_boundaries(graph: &mut HybridGraph) {
    let call_sites: Vec<NodeId> = graph
        .nodes()
        .iter()
        .filter(|n| n.kind == NodeKind::ExternalCallSite)
        .map(|n| n.id)
        .collect();

    let mut marked: BTreeSet<NodeId> = BTreeSet::new();
    // Forward and backward closures over non-syntactic edges, each with its
    // own visited set so one direction never truncates the other
    for forward in [true, false] {
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let mut stack = call_sites.clone();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            marked.insert(id);
            for kind in [EdgeKind::ControlFlow, EdgeKind::DataDependency] {
                let next: Vec<NodeId> = if forward {
                    graph.outgoing(id, kind).collect()
                } else {
                    graph.incoming(id, kind).collect()
                };
                for n in next {
                    if !visited.contains(&n) {
                        stack.push(n);
                    }
                }
            }
        }
    }

    for id in marked {
        graph.nodes_mut()[id.0 as usize].crosses_trust_boundary = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::analyze_flows;
    use crate::normalize::{normalize, NoImports};

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

    fn graph_for(source: &str) -> HybridGraph {
        let unit = normalize(source, None, &NoImports).unwrap();
        let flows = analyze_flows(&unit);
        build_hybrid_graph(&unit, &flows)
    }

    #[test]
    fn test_graph_validates() {
        let graph = graph_for(BANK);
        graph.validate().unwrap();
        assert!(!graph.is_empty());
    }

    #[test]
    fn test_external_call_site_node_exists() {
        let graph = graph_for(BANK);
        let call_sites: Vec<_> = graph
            .nodes()
            .iter()
            .filter(|n| n.kind == NodeKind::ExternalCallSite)
            .collect();
        assert_eq!(call_sites.len(), 1);
        assert!(call_sites[0].flags.value_transfer);
        assert!(call_sites[0].type_signature.contains("msg.sender.call"));
    }

    #[test]
    fn test_trust_boundary_marks_post_call_write() {
        let graph = graph_for(BANK);
        let write = graph
            .nodes()
            .iter()
            .find(|n| n.flags.storage_write && n.kind == NodeKind::Statement)
            .expect("balance write node");
        assert!(write.crosses_trust_boundary);
    }

    #[test]
    fn test_no_external_call_no_call_site_nodes() {
        let graph = graph_for(
            r#"
            contract Safe {
                uint total;
                function add(uint v) public { total += v; }
            }
        "#,
        );
        assert!(graph
            .nodes()
            .iter()
            .all(|n| n.kind != NodeKind::ExternalCallSite));
        assert!(graph.nodes().iter().all(|n| !n.crosses_trust_boundary));
    }

    #[test]
    fn test_deterministic_rebuild() {
        let unit = normalize(BANK, None, &NoImports).unwrap();
        let flows = analyze_flows(&unit);
        let a = build_hybrid_graph(&unit, &flows);
        let b = build_hybrid_graph(&unit, &flows);
        let a_json = serde_json::to_string(&a).unwrap();
        let b_json = serde_json::to_string(&b).unwrap();
        assert_eq!(a_json, b_json);
    }

    #[test]
    fn test_variable_node_typed() {
        let graph = graph_for(BANK);
        let var = graph
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::Variable)
            .expect("state var node");
        assert_eq!(var.label, "balances");
        assert!(var.type_signature.starts_with("mapping("));
    }
}
