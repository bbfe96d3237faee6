pub mod builder;
pub mod cfg;
pub mod dfg;
pub mod facts;

pub use builder::analyze_flows;
pub use cfg::{ControlEdgeKind, ControlFlowGraph, FunctionFlow, StmtArena, StmtId, StmtNode, StmtRole};
pub use dfg::DataFlowGraph;
pub use facts::{CallFact, StmtFacts, VarRef};

use crate::error::CoverageFlag;

/// Output of the flow analyzer: the statement arena shared by both graphs,
/// the control-flow graph, the data-flow graph, and any coverage degradation
/// picked up along the way. Weakly references the CanonicalUnit via symbol
/// names only; it never outlives or mutates it.
#[derive(Debug)]
pub struct FlowArtifacts {
    pub arena: StmtArena,
    pub cfg: ControlFlowGraph,
    pub dfg: DataFlowGraph,
    pub coverage: Vec<CoverageFlag>,
}
