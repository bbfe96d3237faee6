use serde::Serialize;

/// Source position range, 1-based lines and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SourceSpan {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl SourceSpan {
    pub fn new(start_line: usize, start_col: usize, end_line: usize, end_col: usize) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    pub fn point(line: usize, col: usize) -> Self {
        Self::new(line, col, line, col)
    }

    /// Smallest span covering both.
    pub fn merge(&self, other: &SourceSpan) -> SourceSpan {
        let start = (*self).min(*other);
        let end = if (self.end_line, self.end_col) >= (other.end_line, other.end_col) {
            *self
        } else {
            *other
        };
        SourceSpan::new(start.start_line, start.start_col, end.end_line, end.end_col)
    }
}

/// A parsed compilation unit before normalization.
#[derive(Debug, Clone, Serialize)]
pub struct SourceUnit {
    pub pragma: Option<String>,
    pub imports: Vec<ImportDirective>,
    pub contracts: Vec<ContractDef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportDirective {
    pub path: String,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContractKind {
    Contract,
    Interface,
    Library,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractDef {
    pub name: String,
    pub kind: ContractKind,
    pub bases: Vec<String>,
    pub state_vars: Vec<StateVarDecl>,
    pub functions: Vec<FunctionDef>,
    pub events: Vec<EventDef>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateVarDecl {
    pub name: String,
    pub type_name: TypeName,
    pub visibility: Visibility,
    pub constant: bool,
    pub initializer: Option<Expression>,
    pub span: SourceSpan,
}

/// Solidity type expression, kept as structured text plus shape markers the
/// flow analyzer cares about (mappings and arrays alias conservatively).
#[derive(Debug, Clone, Serialize)]
pub struct TypeName {
    pub text: String,
    pub is_mapping: bool,
    pub is_array: bool,
}

impl TypeName {
    pub fn elementary(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_mapping: false,
            is_array: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Visibility {
    Public,
    Private,
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mutability {
    NonPayable,
    Payable,
    View,
    Pure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionKind {
    Function,
    Constructor,
    Fallback,
    Receive,
    Modifier,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamDecl {
    pub name: String,
    pub type_name: TypeName,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDef {
    pub name: String,
    pub kind: FunctionKind,
    pub params: Vec<ParamDecl>,
    pub returns: Vec<ParamDecl>,
    pub visibility: Visibility,
    pub mutability: Mutability,
    /// Modifier invocations on the signature (e.g. `onlyOwner`, `nonReentrant`).
    pub modifiers: Vec<String>,
    pub body: Option<Block>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDef {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize)]
pub enum StatementKind {
    VarDecl {
        name: String,
        type_name: TypeName,
        initializer: Option<Expression>,
    },
    Expr(Expression),
    If {
        condition: Expression,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While {
        condition: Expression,
        body: Block,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        update: Option<Expression>,
        body: Block,
    },
    Return(Option<Expression>),
    /// require / assert, a guard that reverts on failure.
    Require {
        args: Vec<Expression>,
        is_assert: bool,
    },
    Revert {
        args: Vec<Expression>,
    },
    Emit {
        event: String,
        args: Vec<Expression>,
    },
    Block(Block),
    Break,
    Continue,
    /// A construct outside the modeled subset (assembly, try/catch, ...).
    /// The raw text is retained so the semantic channel still sees it.
    Unsupported {
        construct: String,
        raw: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Expression {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize)]
pub enum ExprKind {
    Identifier(String),
    NumberLit(String),
    StringLit(String),
    BoolLit(bool),
    /// `base.member`
    Member {
        base: Box<Expression>,
        member: String,
    },
    /// `base[index]`
    Index {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    /// `callee(args)` or `callee{value: v, gas: g}(args)`
    Call {
        callee: Box<Expression>,
        options: Vec<(String, Expression)>,
        args: Vec<Expression>,
    },
    Binary {
        op: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: String,
        operand: Box<Expression>,
    },
    /// `lhs op rhs` where op is `=`, `+=`, `-=`, `*=`, `/=`, `%=`.
    Assign {
        op: String,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Ternary {
        condition: Box<Expression>,
        then_expr: Box<Expression>,
        else_expr: Box<Expression>,
    },
    Tuple(Vec<Expression>),
    /// `new Type`
    New(String),
}

impl Expression {
    /// The leftmost identifier under member/index chains, the storage slot
    /// or variable a write ultimately targets.
    pub fn root_identifier(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Identifier(name) => Some(name),
            ExprKind::Member { base, .. } | ExprKind::Index { base, .. } => {
                base.root_identifier()
            }
            ExprKind::Tuple(items) if items.len() == 1 => items[0].root_identifier(),
            _ => None,
        }
    }
}
