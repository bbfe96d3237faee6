use soliguard::graph::{HybridGraph, HybridNode, NodeKind};
use soliguard::scorer::ChannelEmbedding;

/// Feature slot layout for the structural channel. Message passing keeps
/// slots aligned, so a neighbor's external-call evidence lands in
/// `EXT_CALL` of the receiving node.
pub const F_ENTRY: usize = 0;
pub const F_BRANCH: usize = 1;
pub const F_GUARD: usize = 2;
pub const F_LOOP: usize = 3;
pub const F_STORAGE_WRITE: usize = 4;
pub const F_STORAGE_READ: usize = 5;
pub const F_ARITH: usize = 6;
pub const F_EXT_CALL: usize = 7;
pub const F_VALUE: usize = 8;
pub const F_DELEGATE: usize = 9;
pub const F_TIMESTAMP: usize = 10;
pub const F_UNCHECKED: usize = 11;
pub const F_PRIVILEGED: usize = 12;
pub const F_TRUST: usize = 13;
pub const F_VARIABLE: usize = 14;
pub const F_FUNCTION: usize = 15;

pub const FEATURE_COUNT: usize = 16;

/// Initial per-node feature vector: flags plus a node-kind one-hot, padded
/// to the configured embedding width.
pub fn node_features(node: &HybridNode, dim: usize) -> ChannelEmbedding {
    let mut x = vec![0.0; dim.max(FEATURE_COUNT)];
    let flags = &node.flags;
    x[F_ENTRY] = flags.entry as u8 as f64;
    x[F_BRANCH] = flags.branch as u8 as f64;
    x[F_GUARD] = flags.guard as u8 as f64;
    x[F_LOOP] = flags.loop_header as u8 as f64;
    x[F_STORAGE_WRITE] = flags.storage_write as u8 as f64;
    x[F_STORAGE_READ] = flags.storage_read as u8 as f64;
    x[F_ARITH] = flags.arithmetic as u8 as f64;
    x[F_EXT_CALL] = flags.external_call as u8 as f64;
    x[F_VALUE] = flags.value_transfer as u8 as f64;
    x[F_DELEGATE] = flags.delegatecall as u8 as f64;
    x[F_TIMESTAMP] = flags.timestamp_read as u8 as f64;
    x[F_UNCHECKED] = flags.unchecked_call as u8 as f64;
    x[F_PRIVILEGED] = flags.privileged as u8 as f64;
    x[F_TRUST] = node.crosses_trust_boundary as u8 as f64;
    x[F_VARIABLE] = (node.kind == NodeKind::Variable) as u8 as f64;
    x[F_FUNCTION] = (node.kind == NodeKind::Function) as u8 as f64;
    x
}

pub fn all_features(graph: &HybridGraph, dim: usize) -> Vec<ChannelEmbedding> {
    graph.nodes().iter().map(|n| node_features(n, dim)).collect()
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub fn logit(p: f64) -> f64 {
    let clamped = p.clamp(1e-9, 1.0 - 1e-9);
    (clamped / (1.0 - clamped)).ln()
}
