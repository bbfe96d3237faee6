use serde::Serialize;

use crate::ast::SourceSpan;

use super::facts::StmtFacts;

/// Stable statement identifier, unique within one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StmtId(pub u32);

impl std::fmt::Display for StmtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Role a statement plays in control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StmtRole {
    /// Synthetic per-function entry node; parameters and storage are
    /// considered defined here.
    Entry,
    Straight,
    Branch,
    LoopHeader,
    Return,
    Revert,
    /// require/assert: falls through on success, reverts otherwise.
    Guard,
    Emit,
    /// Outside the modeled subset; opaque for flow purposes.
    Unsupported(String),
}

/// One statement in the arena, with the facts extracted from its AST form.
#[derive(Debug, Clone)]
pub struct StmtNode {
    pub id: StmtId,
    pub contract: String,
    pub function: String,
    pub span: SourceSpan,
    pub facts: StmtFacts,
}

/// Arena of all statements in a run, addressed by [`StmtId`]. Ids are dense
/// and assigned in source order, which downstream ordering relies on.
#[derive(Debug, Default)]
pub struct StmtArena {
    stmts: Vec<StmtNode>,
}

impl StmtArena {
    pub fn push(
        &mut self,
        contract: &str,
        function: &str,
        span: SourceSpan,
        facts: StmtFacts,
    ) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(StmtNode {
            id,
            contract: contract.to_string(),
            function: function.to_string(),
            span,
            facts,
        });
        id
    }

    pub fn get(&self, id: StmtId) -> &StmtNode {
        &self.stmts[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StmtNode> {
        self.stmts.iter()
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ControlEdgeKind {
    Straight,
    BranchTrue,
    BranchFalse,
    LoopBack,
    /// Call-site statement to callee entry (call/return semantics).
    Call,
}

/// Control flow over statement ids. One entry per function; revert and
/// return paths both count as exits.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    pub edges: Vec<(StmtId, StmtId, ControlEdgeKind)>,
    pub functions: Vec<FunctionFlow>,
}

#[derive(Debug, Clone)]
pub struct FunctionFlow {
    pub contract: String,
    pub name: String,
    pub entry: StmtId,
    pub exits: Vec<StmtId>,
    /// All statements belonging to this function, in source order.
    pub statements: Vec<StmtId>,
}

impl ControlFlowGraph {
    pub fn add_edge(&mut self, from: StmtId, to: StmtId, kind: ControlEdgeKind) {
        if !self
            .edges
            .iter()
            .any(|(f, t, k)| *f == from && *t == to && *k == kind)
        {
            self.edges.push((from, to, kind));
        }
    }

    pub fn successors(&self, id: StmtId) -> impl Iterator<Item = StmtId> + '_ {
        self.edges
            .iter()
            .filter(move |(f, _, _)| *f == id)
            .map(|(_, t, _)| *t)
    }

    pub fn predecessors(&self, id: StmtId) -> impl Iterator<Item = StmtId> + '_ {
        self.edges
            .iter()
            .filter(move |(_, t, _)| *t == id)
            .map(|(f, _, _)| *f)
    }

    pub fn function(&self, contract: &str, name: &str) -> Option<&FunctionFlow> {
        self.functions
            .iter()
            .find(|f| f.contract == contract && f.name == name)
    }
}
