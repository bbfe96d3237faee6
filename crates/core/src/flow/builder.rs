use tracing::debug;

use crate::ast::{Block, ContractDef, ContractKind, FunctionDef, SourceSpan, Statement, StatementKind};
use crate::error::CoverageFlag;
use crate::normalize::CanonicalUnit;

use super::cfg::{ControlEdgeKind, ControlFlowGraph, FunctionFlow, StmtArena, StmtId, StmtRole};
use super::dfg;
use super::facts::{collect_expr, render_expr, FactContext, StmtFacts, VarRef};
use super::FlowArtifacts;

/// Derive control-flow and data-flow graphs from a normalized unit.
/// Unsupported constructs degrade the owning function (opaque node plus a
/// coverage flag); they never abort the run.
pub fn analyze_flows(unit: &CanonicalUnit) -> FlowArtifacts {
    let mut arena = StmtArena::default();
    let mut cfg = ControlFlowGraph::default();
    let mut coverage = unit.coverage.clone();

    for contract in &unit.contracts {
        if contract.kind == ContractKind::Interface {
            continue;
        }
        for func in &contract.functions {
            let Some(body) = &func.body else { continue };
            lower_function(
                unit, contract, func, body, &mut arena, &mut cfg, &mut coverage,
            );
        }
    }

    // Call edges from call-site statements to callee entries (call/return
    // semantics). Added after all entries exist.
    let mut call_edges = Vec::new();
    for node in arena.iter() {
        for call in &node.facts.calls {
            if call.is_external {
                continue;
            }
            if let Some(callee) = cfg.function(&node.contract, &call.callee) {
                call_edges.push((node.id, callee.entry));
            }
        }
    }
    for (from, to) in call_edges {
        cfg.add_edge(from, to, ControlEdgeKind::Call);
    }

    let dfg = dfg::build(&arena, &cfg);
    debug!(
        statements = arena.len(),
        control_edges = cfg.edges.len(),
        data_edges = dfg.edges.len(),
        "flow analysis complete"
    );

    FlowArtifacts {
        arena,
        cfg,
        dfg,
        coverage,
    }
}

/// Dangling control ends waiting for their successor, with the edge kind the
/// connection must carry (a branch with no else falls through as BranchFalse).
type Pending = Vec<(StmtId, ControlEdgeKind)>;

struct LoopCtx {
    header: StmtId,
    breaks: Vec<StmtId>,
}

struct FlowBuilder<'a> {
    unit: &'a CanonicalUnit,
    contract: &'a ContractDef,
    function: &'a str,
    arena: &'a mut StmtArena,
    cfg: &'a mut ControlFlowGraph,
    coverage: &'a mut Vec<CoverageFlag>,
    exits: Vec<StmtId>,
    loops: Vec<LoopCtx>,
}

fn lower_function(
    unit: &CanonicalUnit,
    contract: &ContractDef,
    func: &FunctionDef,
    body: &Block,
    arena: &mut StmtArena,
    cfg: &mut ControlFlowGraph,
    coverage: &mut Vec<CoverageFlag>,
) {
    let first_id = arena.len() as u32;

    // Synthetic entry: parameters and storage are defined here, so def-use
    // chains for unwritten state reach back to the function boundary.
    let mut entry_facts = StmtFacts::with_role(StmtRole::Entry);
    for param in &func.params {
        if !param.name.is_empty() {
            entry_facts.writes.push(VarRef {
                name: param.name.clone(),
                is_storage: false,
                is_weak: false,
            });
        }
    }
    for var in &contract.state_vars {
        entry_facts.writes.push(VarRef {
            name: var.name.clone(),
            is_storage: true,
            is_weak: true,
        });
    }
    entry_facts.text = format!("function {}", func.name);
    let entry = arena.push(&contract.name, &func.name, func.span, entry_facts);

    let mut builder = FlowBuilder {
        unit,
        contract,
        function: &func.name,
        arena,
        cfg,
        coverage,
        exits: Vec::new(),
        loops: Vec::new(),
    };

    let dangling = builder.lower_block(body, vec![(entry, ControlEdgeKind::Straight)]);
    // Fall-through ends are exits too
    let mut exits = builder.exits;
    for (id, _) in dangling {
        if !exits.contains(&id) {
            exits.push(id);
        }
    }
    exits.sort();

    let statements: Vec<StmtId> = (first_id..arena.len() as u32).map(StmtId).collect();
    cfg.functions.push(FunctionFlow {
        contract: contract.name.clone(),
        name: func.name.clone(),
        entry,
        exits,
        statements,
    });
}

impl<'a> FlowBuilder<'a> {
    fn fact_ctx(&self) -> FactContext<'_> {
        FactContext {
            contract: self.contract,
            function: self.function,
            symbols: &self.unit.symbols,
        }
    }

    fn connect(&mut self, pending: &Pending, to: StmtId) {
        for (from, kind) in pending {
            self.cfg.add_edge(*from, to, *kind);
        }
    }

    fn push_node(&mut self, span: SourceSpan, facts: StmtFacts, pending: Pending) -> StmtId {
        let id = self
            .arena
            .push(&self.contract.name, self.function, span, facts);
        self.connect(&pending, id);
        id
    }

    fn lower_block(&mut self, block: &Block, mut pending: Pending) -> Pending {
        for stmt in &block.statements {
            pending = self.lower_statement(stmt, pending);
        }
        pending
    }

    fn lower_statement(&mut self, stmt: &Statement, pending: Pending) -> Pending {
        match &stmt.kind {
            StatementKind::VarDecl {
                name, initializer, ..
            } => {
                let mut facts = StmtFacts::with_role(StmtRole::Straight);
                let ctx = self.fact_ctx();
                if let Some(init) = initializer {
                    collect_expr(init, &ctx, &mut facts, true);
                    facts.text = format!("{} = {}", name, render_expr(init));
                } else {
                    facts.text = name.clone();
                }
                facts.writes.push(VarRef {
                    name: name.clone(),
                    is_storage: false,
                    is_weak: false,
                });
                let id = self.push_node(stmt.span, facts, pending);
                vec![(id, ControlEdgeKind::Straight)]
            }
            StatementKind::Expr(expr) => {
                let mut facts = StmtFacts::with_role(StmtRole::Straight);
                let ctx = self.fact_ctx();
                collect_expr(expr, &ctx, &mut facts, false);
                facts.text = render_expr(expr);
                let id = self.push_node(stmt.span, facts, pending);
                vec![(id, ControlEdgeKind::Straight)]
            }
            StatementKind::Require { args, is_assert } => {
                let mut facts = StmtFacts::with_role(StmtRole::Guard);
                let ctx = self.fact_ctx();
                for arg in args {
                    collect_expr(arg, &ctx, &mut facts, true);
                }
                let head = if *is_assert { "assert" } else { "require" };
                facts.text = format!(
                    "{head}({})",
                    args.iter().map(render_expr).collect::<Vec<_>>().join(", ")
                );
                let id = self.push_node(stmt.span, facts, pending);
                // Failing the guard reverts: the guard is an exit on that path
                self.exits.push(id);
                vec![(id, ControlEdgeKind::Straight)]
            }
            StatementKind::Revert { args } => {
                let mut facts = StmtFacts::with_role(StmtRole::Revert);
                let ctx = self.fact_ctx();
                for arg in args {
                    collect_expr(arg, &ctx, &mut facts, true);
                }
                facts.text = "revert".to_string();
                let id = self.push_node(stmt.span, facts, pending);
                self.exits.push(id);
                Vec::new()
            }
            StatementKind::Return(value) => {
                let mut facts = StmtFacts::with_role(StmtRole::Return);
                let ctx = self.fact_ctx();
                if let Some(value) = value {
                    collect_expr(value, &ctx, &mut facts, true);
                    facts.text = format!("return {}", render_expr(value));
                } else {
                    facts.text = "return".to_string();
                }
                let id = self.push_node(stmt.span, facts, pending);
                self.exits.push(id);
                Vec::new()
            }
            StatementKind::Emit { event, args } => {
                let mut facts = StmtFacts::with_role(StmtRole::Emit);
                let ctx = self.fact_ctx();
                for arg in args {
                    collect_expr(arg, &ctx, &mut facts, true);
                }
                facts.text = format!("emit {event}");
                let id = self.push_node(stmt.span, facts, pending);
                vec![(id, ControlEdgeKind::Straight)]
            }
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let mut facts = StmtFacts::with_role(StmtRole::Branch);
                let ctx = self.fact_ctx();
                collect_expr(condition, &ctx, &mut facts, true);
                facts.text = format!("if ({})", render_expr(condition));
                let cond = self.push_node(stmt.span, facts, pending);

                let mut out =
                    self.lower_block(then_branch, vec![(cond, ControlEdgeKind::BranchTrue)]);
                match else_branch {
                    Some(else_branch) => {
                        let else_out = self
                            .lower_block(else_branch, vec![(cond, ControlEdgeKind::BranchFalse)]);
                        out.extend(else_out);
                    }
                    None => out.push((cond, ControlEdgeKind::BranchFalse)),
                }
                out
            }
            StatementKind::While { condition, body } => {
                let mut facts = StmtFacts::with_role(StmtRole::LoopHeader);
                let ctx = self.fact_ctx();
                collect_expr(condition, &ctx, &mut facts, true);
                facts.text = format!("while ({})", render_expr(condition));
                let header = self.push_node(stmt.span, facts, pending);

                self.loops.push(LoopCtx {
                    header,
                    breaks: Vec::new(),
                });
                let body_out =
                    self.lower_block(body, vec![(header, ControlEdgeKind::BranchTrue)]);
                for (from, _) in body_out {
                    self.cfg.add_edge(from, header, ControlEdgeKind::LoopBack);
                }
                let mut out = vec![(header, ControlEdgeKind::BranchFalse)];
                if let Some(ctx) = self.loops.pop() {
                    for b in ctx.breaks {
                        out.push((b, ControlEdgeKind::Straight));
                    }
                }
                out
            }
            StatementKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let mut pending = pending;
                if let Some(init) = init {
                    pending = self.lower_statement(init, pending);
                }

                let mut facts = StmtFacts::with_role(StmtRole::LoopHeader);
                let ctx = self.fact_ctx();
                if let Some(condition) = condition {
                    collect_expr(condition, &ctx, &mut facts, true);
                    facts.text = format!("for (; {}; )", render_expr(condition));
                } else {
                    facts.text = "for (;;)".to_string();
                }
                let header = self.push_node(stmt.span, facts, pending);

                self.loops.push(LoopCtx {
                    header,
                    breaks: Vec::new(),
                });
                let body_out =
                    self.lower_block(body, vec![(header, ControlEdgeKind::BranchTrue)]);

                let back_from = if let Some(update) = update {
                    let mut update_facts = StmtFacts::with_role(StmtRole::Straight);
                    let ctx = self.fact_ctx();
                    collect_expr(update, &ctx, &mut update_facts, false);
                    update_facts.text = render_expr(update);
                    let update_id = self.push_node(update.span, update_facts, body_out);
                    vec![(update_id, ControlEdgeKind::Straight)]
                } else {
                    body_out
                };
                for (from, _) in back_from {
                    self.cfg.add_edge(from, header, ControlEdgeKind::LoopBack);
                }
                let mut out = vec![(header, ControlEdgeKind::BranchFalse)];
                if let Some(loop_ctx) = self.loops.pop() {
                    for b in loop_ctx.breaks {
                        out.push((b, ControlEdgeKind::Straight));
                    }
                }
                out
            }
            StatementKind::Block(inner) => self.lower_block(inner, pending),
            StatementKind::Break => {
                let mut facts = StmtFacts::with_role(StmtRole::Straight);
                facts.text = "break".to_string();
                let id = self.push_node(stmt.span, facts, pending);
                if let Some(ctx) = self.loops.last_mut() {
                    ctx.breaks.push(id);
                }
                Vec::new()
            }
            StatementKind::Continue => {
                let mut facts = StmtFacts::with_role(StmtRole::Straight);
                facts.text = "continue".to_string();
                let id = self.push_node(stmt.span, facts, pending);
                if let Some(header) = self.loops.last().map(|c| c.header) {
                    self.cfg.add_edge(id, header, ControlEdgeKind::LoopBack);
                }
                Vec::new()
            }
            StatementKind::Unsupported { construct, raw } => {
                let mut facts = StmtFacts::with_role(StmtRole::Unsupported(construct.clone()));
                facts.text = raw.chars().take(60).collect();
                let id = self.push_node(stmt.span, facts, pending);
                self.coverage.push(CoverageFlag::UnsupportedConstruct {
                    construct: construct.clone(),
                    line: stmt.span.start_line,
                });
                vec![(id, ControlEdgeKind::Straight)]
            }
        }
    }
}
