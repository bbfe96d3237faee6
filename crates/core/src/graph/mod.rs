pub mod builder;
pub mod hybrid;

pub use builder::build_hybrid_graph;
pub use hybrid::{EdgeKind, HybridEdge, HybridGraph, HybridNode, NodeFlags, NodeId, NodeKind, Origin};
