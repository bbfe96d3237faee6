use serde::Serialize;

use crate::ast::{ContractDef, Expression, ExprKind};
use crate::normalize::SymbolTable;

use super::cfg::StmtRole;

/// A variable touched by a statement. Storage accesses through mappings or
/// arrays are weak: a write may or may not overwrite other keys, so the
/// data-flow analysis never kills earlier definitions through them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarRef {
    pub name: String,
    pub is_storage: bool,
    pub is_weak: bool,
}

/// A call performed by a statement, normalized for scoring.
#[derive(Debug, Clone, Serialize)]
pub struct CallFact {
    /// Rendered callee, e.g. `msg.sender.call` or `token.transfer`.
    pub callee: String,
    /// Leaves the contract's trust domain.
    pub is_external: bool,
    pub is_delegatecall: bool,
    /// Moves ether (low-level `{value: ...}`, `send`, `transfer`).
    pub transfers_value: bool,
    /// Low-level call family (`call`/`delegatecall`/`staticcall`/`send`).
    pub is_low_level: bool,
    /// The call's return value is consumed (assigned, checked, or nested).
    pub result_used: bool,
}

/// Everything later stages need to know about one statement, extracted once
/// from its AST form so no stage re-walks the tree.
#[derive(Debug, Clone, Serialize)]
pub struct StmtFacts {
    pub role: StmtRole,
    pub writes: Vec<VarRef>,
    pub reads: Vec<VarRef>,
    pub calls: Vec<CallFact>,
    pub has_arithmetic: bool,
    pub reads_timestamp: bool,
    /// Rendered head of the statement for report anchors.
    pub text: String,
}

impl StmtFacts {
    pub fn with_role(role: StmtRole) -> Self {
        Self {
            role,
            writes: Vec::new(),
            reads: Vec::new(),
            calls: Vec::new(),
            has_arithmetic: false,
            reads_timestamp: false,
            text: String::new(),
        }
    }

    pub fn external_calls(&self) -> impl Iterator<Item = &CallFact> {
        self.calls.iter().filter(|c| c.is_external)
    }

    pub fn writes_storage(&self) -> bool {
        self.writes.iter().any(|w| w.is_storage)
    }

    pub fn reads_storage(&self) -> bool {
        self.reads.iter().any(|r| r.is_storage)
    }
}

/// Extraction context: which contract/function we're inside, for storage
/// lookups and internal-call recognition.
pub struct FactContext<'a> {
    pub contract: &'a ContractDef,
    pub function: &'a str,
    pub symbols: &'a SymbolTable,
}

impl<'a> FactContext<'a> {
    fn is_storage(&self, name: &str) -> bool {
        self.symbols
            .is_storage(&self.contract.name, self.function, name)
    }

    fn is_internal_function(&self, name: &str) -> bool {
        self.contract.functions.iter().any(|f| f.name == name)
    }
}

const ENV_GLOBALS: &[&str] = &["msg", "block", "tx", "abi", "this", "type", "now"];

const LOW_LEVEL_MEMBERS: &[&str] = &["call", "delegatecall", "staticcall", "send"];

fn is_type_cast(name: &str) -> bool {
    matches!(name, "payable" | "address") || {
        let t = name;
        matches!(t, "bool" | "string" | "bytes" | "uint" | "int")
            || (t.starts_with("uint") && t[4..].chars().all(|c| c.is_ascii_digit()))
            || (t.starts_with("int") && t[3..].chars().all(|c| c.is_ascii_digit()))
            || (t.starts_with("bytes") && t[5..].chars().all(|c| c.is_ascii_digit()))
    }
}

/// Render an expression back to compact text for callee names and anchors.
pub fn render_expr(expr: &Expression) -> String {
    match &expr.kind {
        ExprKind::Identifier(name) => name.clone(),
        ExprKind::NumberLit(text) => text.clone(),
        ExprKind::StringLit(text) => format!("\"{text}\""),
        ExprKind::BoolLit(b) => b.to_string(),
        ExprKind::Member { base, member } => format!("{}.{}", render_expr(base), member),
        ExprKind::Index { base, index } => {
            format!("{}[{}]", render_expr(base), render_expr(index))
        }
        ExprKind::Call { callee, args, .. } => format!(
            "{}({})",
            render_expr(callee),
            args.iter().map(render_expr).collect::<Vec<_>>().join(", ")
        ),
        ExprKind::Binary { op, left, right } => {
            format!("{} {} {}", render_expr(left), op, render_expr(right))
        }
        ExprKind::Unary { op, operand } => {
            if let Some(stripped) = op.strip_suffix("post") {
                format!("{}{}", render_expr(operand), stripped)
            } else {
                format!("{}{}", op, render_expr(operand))
            }
        }
        ExprKind::Assign { op, lhs, rhs } => {
            format!("{} {} {}", render_expr(lhs), op, render_expr(rhs))
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => format!(
            "{} ? {} : {}",
            render_expr(condition),
            render_expr(then_expr),
            render_expr(else_expr)
        ),
        ExprKind::Tuple(items) => format!(
            "({})",
            items.iter().map(render_expr).collect::<Vec<_>>().join(", ")
        ),
        ExprKind::New(type_name) => format!("new {type_name}"),
    }
}

/// Walk an expression, collecting reads/writes/calls/markers into `facts`.
/// `value_used` tracks whether this expression's value is consumed by its
/// parent, which decides `CallFact::result_used`.
pub fn collect_expr(expr: &Expression, ctx: &FactContext, facts: &mut StmtFacts, value_used: bool) {
    match &expr.kind {
        ExprKind::Identifier(name) => {
            if !ENV_GLOBALS.contains(&name.as_str()) && !is_type_cast(name) {
                let is_storage = ctx.is_storage(name);
                push_unique(
                    &mut facts.reads,
                    VarRef {
                        name: name.clone(),
                        is_storage,
                        is_weak: false,
                    },
                );
            }
            if name == "now" {
                facts.reads_timestamp = true;
            }
        }
        ExprKind::NumberLit(_) | ExprKind::StringLit(_) | ExprKind::BoolLit(_) => {}
        ExprKind::Member { base, member } => {
            if let ExprKind::Identifier(root) = &base.kind {
                if root == "block" && member == "timestamp" {
                    facts.reads_timestamp = true;
                }
            }
            collect_expr(base, ctx, facts, true);
        }
        ExprKind::Index { base, index } => {
            collect_expr(base, ctx, facts, true);
            collect_expr(index, ctx, facts, true);
        }
        ExprKind::Call {
            callee,
            options,
            args,
        } => {
            collect_call(expr, callee, options, ctx, facts, value_used);
            for (_, opt) in options {
                collect_expr(opt, ctx, facts, true);
            }
            for arg in args {
                collect_expr(arg, ctx, facts, true);
            }
            // The callee's base is a read (e.g. `token` in token.transfer)
            if let ExprKind::Member { base, .. } = &callee.kind {
                collect_expr(base, ctx, facts, true);
            }
        }
        ExprKind::Binary { op, left, right } => {
            if matches!(op.as_str(), "+" | "-" | "*" | "/" | "%" | "**") {
                facts.has_arithmetic = true;
            }
            collect_expr(left, ctx, facts, true);
            collect_expr(right, ctx, facts, true);
        }
        ExprKind::Unary { op, operand } => {
            if op.starts_with("++") || op.starts_with("--") {
                facts.has_arithmetic = true;
                collect_write_target(operand, ctx, facts);
            }
            collect_expr(operand, ctx, facts, true);
        }
        ExprKind::Assign { op, lhs, rhs } => {
            if op != "=" {
                facts.has_arithmetic = true;
                // Compound assignment reads the target too
                collect_expr(lhs, ctx, facts, true);
            } else {
                // Index/member path still reads its keys
                if let ExprKind::Index { index, .. } = &lhs.kind {
                    collect_expr(index, ctx, facts, true);
                }
            }
            collect_write_target(lhs, ctx, facts);
            collect_expr(rhs, ctx, facts, true);
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            collect_expr(condition, ctx, facts, true);
            collect_expr(then_expr, ctx, facts, value_used);
            collect_expr(else_expr, ctx, facts, value_used);
        }
        ExprKind::Tuple(items) => {
            for item in items {
                collect_expr(item, ctx, facts, value_used);
            }
        }
        ExprKind::New(_) => {}
    }
}

fn collect_write_target(lhs: &Expression, ctx: &FactContext, facts: &mut StmtFacts) {
    if let Some(root) = lhs.root_identifier() {
        let is_weak = !matches!(lhs.kind, ExprKind::Identifier(_));
        push_unique(
            &mut facts.writes,
            VarRef {
                name: root.to_string(),
                is_storage: ctx.is_storage(root),
                is_weak,
            },
        );
    }
}

fn collect_call(
    expr: &Expression,
    callee: &Expression,
    options: &[(String, Expression)],
    ctx: &FactContext,
    facts: &mut StmtFacts,
    value_used: bool,
) {
    let _ = expr;
    match &callee.kind {
        ExprKind::Member { base, member } => {
            let base_text = render_expr(base);
            let is_low_level = LOW_LEVEL_MEMBERS.contains(&member.as_str());
            let is_value_member = matches!(member.as_str(), "transfer" | "send");
            let sends_value =
                is_value_member || options.iter().any(|(k, _)| k == "value");
            // Any member call on something other than environment globals'
            // pure accessors leaves the trust domain; `abi.*` and casts stay
            // inside it.
            let base_root = base.root_identifier().unwrap_or("");
            let is_internal_helper =
                base_root == "abi" || base_root == "type" || is_type_cast(base_root);
            if is_low_level || (!is_internal_helper && !base_text.is_empty()) {
                facts.calls.push(CallFact {
                    callee: format!("{base_text}.{member}"),
                    is_external: !is_internal_helper,
                    is_delegatecall: member == "delegatecall",
                    transfers_value: sends_value,
                    is_low_level,
                    result_used: value_used,
                });
            }
        }
        ExprKind::Identifier(name) => {
            if is_type_cast(name) {
                return;
            }
            if name == "selfdestruct" || name == "suicide" {
                facts.calls.push(CallFact {
                    callee: name.clone(),
                    is_external: false,
                    is_delegatecall: false,
                    transfers_value: true,
                    is_low_level: false,
                    result_used: value_used,
                });
                return;
            }
            if ctx.is_internal_function(name) || name == "keccak256" || name == "sha256" {
                facts.calls.push(CallFact {
                    callee: name.clone(),
                    is_external: false,
                    is_delegatecall: false,
                    transfers_value: false,
                    is_low_level: false,
                    result_used: value_used,
                });
            }
        }
        _ => {}
    }
}

fn push_unique(list: &mut Vec<VarRef>, var: VarRef) {
    if !list.contains(&var) {
        list.push(var);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_source;
    use crate::normalize::{normalize, NoImports};

    fn facts_for(source: &str, stmt_idx: usize) -> StmtFacts {
        let unit = normalize(source, None, &NoImports).unwrap();
        let contract = &unit.contracts[0];
        let func = &contract.functions[0];
        let body = func.body.as_ref().unwrap();
        let stmt = &body.statements[stmt_idx];
        let ctx = FactContext {
            contract,
            function: &func.name,
            symbols: &unit.symbols,
        };
        let mut facts = StmtFacts::with_role(StmtRole::Straight);
        if let crate::ast::StatementKind::Expr(expr) = &stmt.kind {
            collect_expr(expr, &ctx, &mut facts, false);
            facts.text = render_expr(expr);
        }
        facts
    }

    const BANK: &str = r#"
        contract Bank {
            mapping(address => uint) balances;
            function withdraw(uint amount) public {
                msg.sender.call{value: amount}("");
                balances[msg.sender] -= amount;
            }
        }
    "#;

    #[test]
    fn test_low_level_call_is_external_value_transfer() {
        let facts = facts_for(BANK, 0);
        assert_eq!(facts.calls.len(), 1);
        let call = &facts.calls[0];
        assert_eq!(call.callee, "msg.sender.call");
        assert!(call.is_external);
        assert!(call.is_low_level);
        assert!(call.transfers_value);
        assert!(!call.result_used);
    }

    #[test]
    fn test_storage_write_through_mapping_is_weak() {
        let facts = facts_for(BANK, 1);
        assert_eq!(facts.writes.len(), 1);
        let write = &facts.writes[0];
        assert_eq!(write.name, "balances");
        assert!(write.is_storage);
        assert!(write.is_weak);
        assert!(facts.has_arithmetic);
        // Compound assignment reads the slot it writes
        assert!(facts.reads.iter().any(|r| r.name == "balances"));
    }

    #[test]
    fn test_timestamp_read_detected() {
        let source = r#"
            contract T {
                uint deadline;
                function late() public view returns (bool) {
                    return block.timestamp > deadline;
                }
            }
        "#;
        let unit = normalize(source, None, &NoImports).unwrap();
        let contract = &unit.contracts[0];
        let func = &contract.functions[0];
        let body = func.body.as_ref().unwrap();
        let crate::ast::StatementKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        let ctx = FactContext {
            contract,
            function: &func.name,
            symbols: &unit.symbols,
        };
        let mut facts = StmtFacts::with_role(StmtRole::Return);
        collect_expr(expr, &ctx, &mut facts, true);
        assert!(facts.reads_timestamp);
        assert!(facts.reads.iter().any(|r| r.name == "deadline" && r.is_storage));
    }

    #[test]
    fn test_type_cast_is_not_a_call() {
        let source = r#"
            contract C {
                function f(address a) public pure returns (uint) {
                    return uint(uint160(a));
                }
            }
        "#;
        let unit = parse_source(source).unwrap();
        assert_eq!(unit.contracts.len(), 1);
        let norm = normalize(source, None, &NoImports).unwrap();
        let contract = &norm.contracts[0];
        let func = &contract.functions[0];
        let body = func.body.as_ref().unwrap();
        let crate::ast::StatementKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        let ctx = FactContext {
            contract,
            function: &func.name,
            symbols: &norm.symbols,
        };
        let mut facts = StmtFacts::with_role(StmtRole::Return);
        collect_expr(expr, &ctx, &mut facts, true);
        assert!(facts.calls.is_empty());
    }
}
