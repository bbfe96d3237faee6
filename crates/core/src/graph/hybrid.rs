use serde::Serialize;

use crate::ast::SourceSpan;
use crate::error::CoverageFlag;
use crate::flow::StmtId;

/// Stable node identifier, unique within a single analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum NodeKind {
    Statement,
    Variable,
    Function,
    ExternalCallSite,
}

/// Which source representations contributed the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub ast: bool,
    pub cfg: bool,
    pub dfg: bool,
}

/// Semantic markers attached during enrichment. These are first-class scorer
/// features, not presentation hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeFlags {
    pub entry: bool,
    pub branch: bool,
    pub guard: bool,
    pub loop_header: bool,
    pub storage_write: bool,
    pub storage_read: bool,
    pub arithmetic: bool,
    pub external_call: bool,
    pub value_transfer: bool,
    pub delegatecall: bool,
    pub timestamp_read: bool,
    pub unchecked_call: bool,
    pub privileged: bool,
    pub unbounded_loop: bool,
    pub modifier_guarded: bool,
    pub unsupported: bool,
}

impl NodeFlags {
    /// Neutral flags for an ablated node.
    pub fn cleared() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Rendered statement head / variable name / qualified function name.
    pub label: String,
    /// Resolved type for variables, call signature for call sites,
    /// function signature for functions.
    pub type_signature: String,
    pub contract: String,
    pub function: Option<String>,
    pub span: SourceSpan,
    pub origin: Origin,
    /// Back-reference into the statement arena, for statement-backed nodes.
    pub stmt: Option<StmtId>,
    pub flags: NodeFlags,
    /// Reachable from, or leading to, an external call over control or data
    /// edges.
    pub crosses_trust_boundary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EdgeKind {
    Syntactic,
    ControlFlow,
    DataDependency,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridEdge {
    pub kind: EdgeKind,
    pub source: NodeId,
    pub target: NodeId,
    pub weight: Option<f64>,
}

/// The unified analysis artifact: one arena of nodes plus separate edge
/// collections per kind, addressed by stable integer ids (no ownership
/// cycles). Built once per run, read-only thereafter.
#[derive(Debug, Clone, Serialize)]
pub struct HybridGraph {
    nodes: Vec<HybridNode>,
    /// Sorted by (kind, source, target); determinism tests rely on it.
    edges: Vec<HybridEdge>,
    pub checked_arithmetic: bool,
    pub coverage: Vec<CoverageFlag>,
}

impl HybridGraph {
    pub(crate) fn from_parts(
        nodes: Vec<HybridNode>,
        mut edges: Vec<HybridEdge>,
        checked_arithmetic: bool,
        coverage: Vec<CoverageFlag>,
    ) -> Self {
        edges.sort_by_key(|e| (e.kind, e.source, e.target));
        edges.dedup_by_key(|e| (e.kind, e.source, e.target));
        Self {
            nodes,
            edges,
            checked_arithmetic,
            coverage,
        }
    }

    pub fn node(&self, id: NodeId) -> &HybridNode {
        &self.nodes[id.0 as usize]
    }

    pub fn nodes(&self) -> &[HybridNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [HybridNode] {
        &mut self.nodes
    }

    pub fn edges(&self) -> &[HybridEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn incoming(&self, id: NodeId, kind: EdgeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.target == id && e.kind == kind)
            .map(|e| e.source)
    }

    pub fn outgoing(&self, id: NodeId, kind: EdgeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.source == id && e.kind == kind)
            .map(|e| e.target)
    }

    /// Every edge endpoint must resolve to an existing node.
    pub fn validate(&self) -> Result<(), String> {
        for edge in &self.edges {
            for endpoint in [edge.source, edge.target] {
                if endpoint.0 as usize >= self.nodes.len() {
                    return Err(format!("dangling edge endpoint {endpoint}"));
                }
            }
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.id.0 as usize != idx {
                return Err(format!("node id {} out of place", node.id));
            }
        }
        Ok(())
    }

    /// A copy with the given nodes neutralized: their semantic flags cleared,
    /// their kind demoted to plain statement, and every incident edge
    /// removed. Node ids stay stable so retained embeddings and anchors keep
    /// resolving. This is the perturbation primitive behind attribution and
    /// counterfactual search.
    pub fn without_nodes(&self, removed: &[NodeId]) -> HybridGraph {
        let mut clone = self.clone();
        for &id in removed {
            let node = &mut clone.nodes[id.0 as usize];
            node.flags = NodeFlags::cleared();
            node.kind = NodeKind::Statement;
            node.crosses_trust_boundary = false;
            // Blank the text too, or token-level channels would still see
            // the ablated statement
            node.label.clear();
            node.type_signature.clear();
        }
        clone
            .edges
            .retain(|e| !removed.contains(&e.source) && !removed.contains(&e.target));
        clone
    }
}
