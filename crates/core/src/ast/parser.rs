use crate::error::{AnalysisError, Result};

use super::lexer::{tokenize, Token, TokenKind};
use super::types::*;

/// Elementary type keywords of the modeled subset. `uintN`/`intN`/`bytesN`
/// are matched by prefix.
fn is_elementary_type(text: &str) -> bool {
    matches!(text, "address" | "bool" | "string" | "bytes" | "uint" | "int")
        || (text.starts_with("uint") && text[4..].chars().all(|c| c.is_ascii_digit()))
        || (text.starts_with("int") && text[3..].chars().all(|c| c.is_ascii_digit()))
        || (text.starts_with("bytes") && text[5..].chars().all(|c| c.is_ascii_digit()))
}

const UNIT_SUFFIXES: &[&str] = &[
    "wei", "gwei", "ether", "seconds", "minutes", "hours", "days", "weeks",
];

/// Parse Solidity source text into a [`SourceUnit`].
pub fn parse_source(source: &str) -> Result<SourceUnit> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_unit()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // --- token cursor -------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn at(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.text == text)
    }

    fn bump(&mut self) -> Result<Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.eof_error("unexpected end of input"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.at(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> Result<Token> {
        if self.at(text) {
            self.bump()
        } else {
            Err(self.error_here(format!("expected `{text}`")))
        }
    }

    fn expect_ident(&mut self) -> Result<Token> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => self.bump(),
            _ => Err(self.error_here("expected identifier")),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> AnalysisError {
        match self.peek().or_else(|| self.tokens.last()) {
            Some(t) => AnalysisError::parse(t.line, t.col, message),
            None => AnalysisError::parse(1, 1, message),
        }
    }

    fn eof_error(&self, message: &str) -> AnalysisError {
        match self.tokens.last() {
            Some(t) => AnalysisError::parse(t.line, t.col, message),
            None => AnalysisError::parse(1, 1, message),
        }
    }

    fn span_of(&self, tok: &Token) -> SourceSpan {
        SourceSpan::new(tok.line, tok.col, tok.line, tok.col + tok.text.len())
    }

    /// Span from a saved start position up to the previously consumed token.
    fn span_from(&self, start_pos: usize) -> SourceSpan {
        let start = &self.tokens[start_pos.min(self.tokens.len() - 1)];
        let end = &self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)];
        SourceSpan::new(start.line, start.col, end.line, end.col + end.text.len())
    }

    // --- top level ----------------------------------------------------------

    fn parse_unit(&mut self) -> Result<SourceUnit> {
        let mut unit = SourceUnit {
            pragma: None,
            imports: Vec::new(),
            contracts: Vec::new(),
        };

        while self.peek().is_some() {
            if self.at("pragma") {
                unit.pragma = Some(self.parse_pragma()?);
            } else if self.at("import") {
                unit.imports.push(self.parse_import()?);
            } else if self.at("abstract")
                || self.at("contract")
                || self.at("interface")
                || self.at("library")
            {
                unit.contracts.push(self.parse_contract()?);
            } else {
                return Err(self.error_here(format!(
                    "unexpected token `{}` at top level",
                    self.peek().map(|t| t.text.as_str()).unwrap_or("")
                )));
            }
        }

        Ok(unit)
    }

    fn parse_pragma(&mut self) -> Result<String> {
        self.expect("pragma")?;
        let mut parts = Vec::new();
        while !self.at(";") {
            if self.peek().is_none() {
                return Err(self.eof_error("unterminated pragma directive"));
            }
            parts.push(self.bump()?.text);
        }
        self.expect(";")?;
        Ok(parts.join(" "))
    }

    fn parse_import(&mut self) -> Result<ImportDirective> {
        let start = self.pos;
        self.expect("import")?;
        let mut path = String::new();
        while !self.at(";") {
            let tok = self.bump()?;
            if tok.kind == TokenKind::StringLit {
                path = tok.text;
            }
        }
        self.expect(";")?;
        if path.is_empty() {
            return Err(self.error_here("import directive without a path"));
        }
        Ok(ImportDirective {
            path,
            span: self.span_from(start),
        })
    }

    fn parse_contract(&mut self) -> Result<ContractDef> {
        let start = self.pos;
        self.eat("abstract");
        let kind = match self.bump()?.text.as_str() {
            "contract" => ContractKind::Contract,
            "interface" => ContractKind::Interface,
            "library" => ContractKind::Library,
            other => {
                return Err(self.error_here(format!("expected contract kind, found `{other}`")))
            }
        };
        let name = self.expect_ident()?.text;

        let mut bases = Vec::new();
        if self.eat("is") {
            loop {
                bases.push(self.expect_ident()?.text);
                // Base constructor arguments: Base(1, 2)
                if self.at("(") {
                    self.skip_balanced("(", ")")?;
                }
                if !self.eat(",") {
                    break;
                }
            }
        }

        self.expect("{")?;
        let mut contract = ContractDef {
            name,
            kind,
            bases,
            state_vars: Vec::new(),
            functions: Vec::new(),
            events: Vec::new(),
            span: SourceSpan::point(1, 1),
        };

        while !self.at("}") {
            if self.peek().is_none() {
                return Err(self.eof_error("unterminated contract body"));
            }
            self.parse_contract_member(&mut contract)?;
        }
        self.expect("}")?;
        contract.span = self.span_from(start);
        Ok(contract)
    }

    fn parse_contract_member(&mut self, contract: &mut ContractDef) -> Result<()> {
        if self.at("function")
            || self.at("constructor")
            || self.at("receive")
            || self.at("fallback")
            || self.at("modifier")
        {
            let func = self.parse_function()?;
            contract.functions.push(func);
            return Ok(());
        }
        if self.at("event") {
            contract.events.push(self.parse_event()?);
            return Ok(());
        }
        if self.at("using") {
            // `using SafeMath for uint;` is a library binding, no behavior
            while !self.at(";") {
                self.bump()?;
            }
            self.expect(";")?;
            return Ok(());
        }
        if self.at("error") && self.peek_at(2).is_some_and(|t| t.is("(")) {
            // Custom error declaration, no behavior
            while !self.at(";") {
                self.bump()?;
            }
            self.expect(";")?;
            return Ok(());
        }
        if self.at("struct") || self.at("enum") {
            // Type declarations carry no executable behavior
            self.bump()?;
            self.expect_ident()?;
            self.skip_balanced("{", "}")?;
            return Ok(());
        }
        // Anything else is a state variable declaration
        let var = self.parse_state_var()?;
        contract.state_vars.push(var);
        Ok(())
    }

    fn parse_event(&mut self) -> Result<EventDef> {
        let start = self.pos;
        self.expect("event")?;
        let name = self.expect_ident()?.text;
        let params = self.parse_param_list()?;
        self.eat("anonymous");
        self.expect(";")?;
        Ok(EventDef {
            name,
            params,
            span: self.span_from(start),
        })
    }

    fn parse_state_var(&mut self) -> Result<StateVarDecl> {
        let start = self.pos;
        let type_name = self.parse_type()?;

        let mut visibility = Visibility::Internal;
        let mut constant = false;
        loop {
            match self.peek().map(|t| t.text.as_str()) {
                Some("public") => {
                    visibility = Visibility::Public;
                    self.bump()?;
                }
                Some("private") => {
                    visibility = Visibility::Private;
                    self.bump()?;
                }
                Some("internal") => {
                    visibility = Visibility::Internal;
                    self.bump()?;
                }
                Some("constant") | Some("immutable") => {
                    constant = true;
                    self.bump()?;
                }
                _ => break,
            }
        }

        let name = self.expect_ident()?.text;
        let initializer = if self.eat("=") {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(";")?;

        Ok(StateVarDecl {
            name,
            type_name,
            visibility,
            constant,
            initializer,
            span: self.span_from(start),
        })
    }

    // --- functions ----------------------------------------------------------

    fn parse_function(&mut self) -> Result<FunctionDef> {
        let start = self.pos;
        let keyword = self.bump()?.text;
        let (kind, name) = match keyword.as_str() {
            "function" => (FunctionKind::Function, self.expect_ident()?.text),
            "constructor" => (FunctionKind::Constructor, "constructor".to_string()),
            "receive" => (FunctionKind::Receive, "receive".to_string()),
            "fallback" => (FunctionKind::Fallback, "fallback".to_string()),
            "modifier" => (FunctionKind::Modifier, self.expect_ident()?.text),
            other => return Err(self.error_here(format!("unexpected `{other}`"))),
        };

        let params = if self.at("(") {
            self.parse_param_list()?
        } else {
            Vec::new()
        };

        let mut visibility = Visibility::Public;
        let mut mutability = Mutability::NonPayable;
        let mut modifiers = Vec::new();
        let mut returns = Vec::new();

        loop {
            let Some(tok) = self.peek() else { break };
            match tok.text.as_str() {
                "public" => {
                    visibility = Visibility::Public;
                    self.bump()?;
                }
                "private" => {
                    visibility = Visibility::Private;
                    self.bump()?;
                }
                "internal" => {
                    visibility = Visibility::Internal;
                    self.bump()?;
                }
                "external" => {
                    visibility = Visibility::External;
                    self.bump()?;
                }
                "payable" => {
                    mutability = Mutability::Payable;
                    self.bump()?;
                }
                "view" => {
                    mutability = Mutability::View;
                    self.bump()?;
                }
                "pure" => {
                    mutability = Mutability::Pure;
                    self.bump()?;
                }
                "virtual" | "override" => {
                    self.bump()?;
                    if self.at("(") {
                        self.skip_balanced("(", ")")?;
                    }
                }
                "returns" => {
                    self.bump()?;
                    returns = self.parse_param_list()?;
                }
                "{" | ";" => break,
                _ if tok.kind == TokenKind::Identifier => {
                    // Modifier invocation, optionally with arguments
                    let name = self.bump()?.text;
                    if self.at("(") {
                        self.skip_balanced("(", ")")?;
                    }
                    modifiers.push(name);
                }
                _ => return Err(self.error_here("expected function attribute or body")),
            }
        }

        let body = if self.at("{") {
            Some(self.parse_block()?)
        } else {
            self.expect(";")?;
            None
        };

        Ok(FunctionDef {
            name,
            kind,
            params,
            returns,
            visibility,
            mutability,
            modifiers,
            body,
            span: self.span_from(start),
        })
    }

    fn parse_param_list(&mut self) -> Result<Vec<ParamDecl>> {
        self.expect("(")?;
        let mut params = Vec::new();
        while !self.at(")") {
            let type_name = self.parse_type()?;
            // Data location, then optional name
            while self.at("memory") || self.at("storage") || self.at("calldata") || self.at("indexed")
            {
                self.bump()?;
            }
            let name = match self.peek() {
                Some(t) if t.kind == TokenKind::Identifier && !t.is(",") => self.bump()?.text,
                _ => String::new(),
            };
            params.push(ParamDecl { name, type_name });
            if !self.eat(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok(params)
    }

    fn parse_type(&mut self) -> Result<TypeName> {
        if self.at("mapping") {
            self.bump()?;
            self.expect("(")?;
            let key = self.parse_type()?;
            self.expect("=>")?;
            let value = self.parse_type()?;
            self.expect(")")?;
            return Ok(TypeName {
                text: format!("mapping({} => {})", key.text, value.text),
                is_mapping: true,
                is_array: false,
            });
        }

        let base = self.expect_ident()?;
        let mut text = base.text.clone();

        // `address payable`
        if text == "address" && self.at("payable") {
            self.bump()?;
            text.push_str(" payable");
        }

        // Qualified user types: `Lib.Struct`
        while self.at(".") && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Identifier) {
            self.bump()?;
            let seg = self.bump()?.text;
            text.push('.');
            text.push_str(&seg);
        }

        let mut is_array = false;
        while self.at("[") {
            self.bump()?;
            if !self.at("]") {
                // Fixed-size array bound
                let _ = self.parse_expression()?;
            }
            self.expect("]")?;
            text.push_str("[]");
            is_array = true;
        }

        Ok(TypeName {
            text,
            is_mapping: false,
            is_array,
        })
    }

    // --- statements ---------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block> {
        let start = self.pos;
        self.expect("{")?;
        let mut statements = Vec::new();
        while !self.at("}") {
            if self.peek().is_none() {
                return Err(self.eof_error("unterminated block"));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect("}")?;
        Ok(Block {
            statements,
            span: self.span_from(start),
        })
    }

    /// Parse a statement; single statements in branch position are wrapped
    /// into a one-statement block so the CFG only deals with blocks.
    fn parse_branch_body(&mut self) -> Result<Block> {
        if self.at("{") {
            self.parse_block()
        } else {
            let stmt = self.parse_statement()?;
            let span = stmt.span;
            Ok(Block {
                statements: vec![stmt],
                span,
            })
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.pos;
        let Some(tok) = self.peek().cloned() else {
            return Err(self.eof_error("expected statement"));
        };

        match tok.text.as_str() {
            "{" => {
                let block = self.parse_block()?;
                let span = block.span;
                return Ok(Statement {
                    kind: StatementKind::Block(block),
                    span,
                });
            }
            "if" => {
                self.bump()?;
                self.expect("(")?;
                let condition = self.parse_expression()?;
                self.expect(")")?;
                let then_branch = self.parse_branch_body()?;
                let else_branch = if self.eat("else") {
                    if self.at("if") {
                        // `else if` chains: nest as a one-statement block
                        let nested = self.parse_statement()?;
                        let span = nested.span;
                        Some(Block {
                            statements: vec![nested],
                            span,
                        })
                    } else {
                        Some(self.parse_branch_body()?)
                    }
                } else {
                    None
                };
                return Ok(Statement {
                    kind: StatementKind::If {
                        condition,
                        then_branch,
                        else_branch,
                    },
                    span: self.span_from(start),
                });
            }
            "while" => {
                self.bump()?;
                self.expect("(")?;
                let condition = self.parse_expression()?;
                self.expect(")")?;
                let body = self.parse_branch_body()?;
                return Ok(Statement {
                    kind: StatementKind::While { condition, body },
                    span: self.span_from(start),
                });
            }
            "for" => {
                self.bump()?;
                self.expect("(")?;
                let init = if self.at(";") {
                    None
                } else {
                    Some(Box::new(self.parse_simple_statement()?))
                };
                self.expect(";")?;
                let condition = if self.at(";") {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(";")?;
                let update = if self.at(")") {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(")")?;
                let body = self.parse_branch_body()?;
                return Ok(Statement {
                    kind: StatementKind::For {
                        init,
                        condition,
                        update,
                        body,
                    },
                    span: self.span_from(start),
                });
            }
            "return" => {
                self.bump()?;
                let value = if self.at(";") {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(";")?;
                return Ok(Statement {
                    kind: StatementKind::Return(value),
                    span: self.span_from(start),
                });
            }
            "require" | "assert" => {
                let is_assert = tok.text == "assert";
                self.bump()?;
                self.expect("(")?;
                let args = self.parse_call_args()?;
                self.expect(")")?;
                self.expect(";")?;
                return Ok(Statement {
                    kind: StatementKind::Require { args, is_assert },
                    span: self.span_from(start),
                });
            }
            "revert" => {
                self.bump()?;
                let mut args = Vec::new();
                if self
                    .peek()
                    .is_some_and(|t| t.kind == TokenKind::Identifier)
                {
                    // Custom error name
                    self.bump()?;
                }
                if self.eat("(") {
                    args = self.parse_call_args()?;
                    self.expect(")")?;
                }
                self.expect(";")?;
                return Ok(Statement {
                    kind: StatementKind::Revert { args },
                    span: self.span_from(start),
                });
            }
            "emit" => {
                self.bump()?;
                let event = self.expect_ident()?.text;
                self.expect("(")?;
                let args = self.parse_call_args()?;
                self.expect(")")?;
                self.expect(";")?;
                return Ok(Statement {
                    kind: StatementKind::Emit { event, args },
                    span: self.span_from(start),
                });
            }
            "break" | "continue" => {
                self.bump()?;
                self.expect(";")?;
                let kind = if tok.text == "break" {
                    StatementKind::Break
                } else {
                    StatementKind::Continue
                };
                return Ok(Statement {
                    kind,
                    span: self.span_from(start),
                });
            }
            "unchecked" => {
                self.bump()?;
                let block = self.parse_block()?;
                return Ok(Statement {
                    kind: StatementKind::Block(block),
                    span: self.span_from(start),
                });
            }
            "assembly" | "try" | "do" => {
                return self.parse_unsupported(&tok.text.clone());
            }
            _ => {}
        }

        let stmt = self.parse_simple_statement()?;
        self.expect(";")?;
        Ok(Statement {
            kind: stmt.kind,
            span: self.span_from(start),
        })
    }

    /// Variable declaration or expression statement, without the trailing
    /// semicolon (shared by statement and for-init positions).
    fn parse_simple_statement(&mut self) -> Result<Statement> {
        let start = self.pos;

        if self.looks_like_declaration() {
            let type_name = self.parse_type()?;
            while self.at("memory") || self.at("storage") || self.at("calldata") {
                self.bump()?;
            }
            let name = self.expect_ident()?.text;
            let initializer = if self.eat("=") {
                Some(self.parse_expression()?)
            } else {
                None
            };
            return Ok(Statement {
                kind: StatementKind::VarDecl {
                    name,
                    type_name,
                    initializer,
                },
                span: self.span_from(start),
            });
        }

        // Tuple destructuring declaration: `(bool ok, ) = ...`
        if self.at("(")
            && self
                .peek_at(1)
                .is_some_and(|t| is_elementary_type(&t.text))
            && self
                .peek_at(2)
                .is_some_and(|t| t.kind == TokenKind::Identifier)
        {
            self.bump()?;
            let type_name = self.parse_type()?;
            let name = self.expect_ident()?.text;
            // Remaining tuple slots are dropped from the modeled subset;
            // the first declared variable carries the initializer.
            let mut depth = 1usize;
            while depth > 0 {
                let t = self.bump()?;
                match t.text.as_str() {
                    "(" => depth += 1,
                    ")" => depth -= 1,
                    _ => {}
                }
            }
            self.expect("=")?;
            let initializer = Some(self.parse_expression()?);
            return Ok(Statement {
                kind: StatementKind::VarDecl {
                    name,
                    type_name,
                    initializer,
                },
                span: self.span_from(start),
            });
        }

        let expr = self.parse_expression()?;
        let span = expr.span;
        Ok(Statement {
            kind: StatementKind::Expr(expr),
            span,
        })
    }

    fn looks_like_declaration(&self) -> bool {
        let Some(first) = self.peek() else {
            return false;
        };
        if first.text == "mapping" {
            return true;
        }
        if first.kind != TokenKind::Identifier {
            return false;
        }
        if is_elementary_type(&first.text) {
            // `uint x`, but not `uint(x)` casts
            return !self.peek_at(1).is_some_and(|t| t.is("("));
        }
        // `Foo x = ...`, `Foo memory x` or `Foo[] memory x`
        match self.peek_at(1) {
            Some(t) if matches!(t.text.as_str(), "memory" | "storage" | "calldata") => self
                .peek_at(2)
                .is_some_and(|t| t.kind == TokenKind::Identifier),
            Some(t) if t.kind == TokenKind::Identifier => {
                !matches!(t.text.as_str(), "wei" | "gwei" | "ether")
                    && self.peek_at(2).is_some_and(|t| t.is("=") || t.is(";"))
            }
            Some(t) if t.is("[") => self.peek_at(2).is_some_and(|t| t.is("]")),
            _ => false,
        }
    }

    /// Consume a construct outside the modeled subset, retaining its raw
    /// token text. The flow analyzer turns this into an opaque statement and
    /// records an [`crate::error::CoverageFlag::UnsupportedConstruct`].
    fn parse_unsupported(&mut self, construct: &str) -> Result<Statement> {
        let start = self.pos;
        let mut raw = Vec::new();
        raw.push(self.bump()?.text);

        match construct {
            "assembly" => {
                if self.peek().is_some_and(|t| t.kind == TokenKind::StringLit) {
                    raw.push(self.bump()?.text);
                }
                raw.extend(self.collect_balanced("{", "}")?);
            }
            "try" => {
                // `try expr [returns(...)] { } catch ... { }`
                while !self.at("{") {
                    raw.push(self.bump()?.text);
                }
                raw.extend(self.collect_balanced("{", "}")?);
                while self.at("catch") {
                    while !self.at("{") {
                        raw.push(self.bump()?.text);
                    }
                    raw.extend(self.collect_balanced("{", "}")?);
                }
            }
            "do" => {
                raw.extend(self.collect_balanced("{", "}")?);
                while !self.at(";") {
                    raw.push(self.bump()?.text);
                }
                raw.push(self.bump()?.text);
            }
            _ => {}
        }

        Ok(Statement {
            kind: StatementKind::Unsupported {
                construct: construct.to_string(),
                raw: raw.join(" "),
            },
            span: self.span_from(start),
        })
    }

    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<()> {
        self.collect_balanced(open, close).map(|_| ())
    }

    fn collect_balanced(&mut self, open: &str, close: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        out.push(self.expect(open)?.text);
        let mut depth = 1usize;
        while depth > 0 {
            let tok = self.bump()?;
            if tok.text == open {
                depth += 1;
            } else if tok.text == close {
                depth -= 1;
            }
            out.push(tok.text);
        }
        Ok(out)
    }

    // --- expressions --------------------------------------------------------

    fn parse_call_args(&mut self) -> Result<Vec<Expression>> {
        let mut args = Vec::new();
        while !self.at(")") {
            args.push(self.parse_expression()?);
            if !self.eat(",") {
                break;
            }
        }
        Ok(args)
    }

    fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expression> {
        let start = self.pos;
        let lhs = self.parse_ternary()?;
        if let Some(op) = self.peek().map(|t| t.text.clone()) {
            if matches!(op.as_str(), "=" | "+=" | "-=" | "*=" | "/=" | "%=") {
                self.bump()?;
                let rhs = self.parse_assignment()?;
                return Ok(Expression {
                    kind: ExprKind::Assign {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span: self.span_from(start),
                });
            }
        }
        Ok(lhs)
    }

    fn parse_ternary(&mut self) -> Result<Expression> {
        let start = self.pos;
        let condition = self.parse_binary(0)?;
        if self.eat("?") {
            let then_expr = self.parse_expression()?;
            self.expect(":")?;
            let else_expr = self.parse_expression()?;
            return Ok(Expression {
                kind: ExprKind::Ternary {
                    condition: Box::new(condition),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
                span: self.span_from(start),
            });
        }
        Ok(condition)
    }

    /// Binary operator precedence levels, loosest first.
    fn binary_level(op: &str) -> Option<usize> {
        match op {
            "||" => Some(0),
            "&&" => Some(1),
            "==" | "!=" => Some(2),
            "<" | ">" | "<=" | ">=" => Some(3),
            "|" | "^" | "&" => Some(4),
            "<<" | ">>" => Some(5),
            "+" | "-" => Some(6),
            "*" | "/" | "%" => Some(7),
            "**" => Some(8),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_level: usize) -> Result<Expression> {
        let start = self.pos;
        let mut left = self.parse_unary()?;
        loop {
            let Some(op) = self.peek().map(|t| t.text.clone()) else {
                break;
            };
            let Some(level) = Self::binary_level(&op) else {
                break;
            };
            if level < min_level {
                break;
            }
            self.bump()?;
            let right = self.parse_binary(level + 1)?;
            left = Expression {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span: self.span_from(start),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let start = self.pos;
        if let Some(op) = self.peek().map(|t| t.text.clone()) {
            if matches!(op.as_str(), "!" | "-" | "~" | "++" | "--" | "delete") {
                self.bump()?;
                let operand = self.parse_unary()?;
                return Ok(Expression {
                    kind: ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span: self.span_from(start),
                });
            }
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let start = self.pos;
        let mut expr = self.parse_primary()?;

        loop {
            if self.at("(") {
                self.bump()?;
                let args = self.parse_call_args()?;
                self.expect(")")?;
                expr = Expression {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        options: Vec::new(),
                        args,
                    },
                    span: self.span_from(start),
                };
                continue;
            }

            // Call options: `.call{value: amount}(...)`
            if self.at("{")
                && self
                    .peek_at(1)
                    .is_some_and(|t| t.kind == TokenKind::Identifier)
                && self.peek_at(2).is_some_and(|t| t.is(":"))
            {
                self.bump()?;
                let mut options = Vec::new();
                while !self.at("}") {
                    let key = self.expect_ident()?.text;
                    self.expect(":")?;
                    let value = self.parse_expression()?;
                    options.push((key, value));
                    if !self.eat(",") {
                        break;
                    }
                }
                self.expect("}")?;
                self.expect("(")?;
                let args = self.parse_call_args()?;
                self.expect(")")?;
                expr = Expression {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        options,
                        args,
                    },
                    span: self.span_from(start),
                };
                continue;
            }

            if self.at(".") {
                self.bump()?;
                let member = self.expect_ident()?.text;
                expr = Expression {
                    kind: ExprKind::Member {
                        base: Box::new(expr),
                        member,
                    },
                    span: self.span_from(start),
                };
                continue;
            }

            if self.at("[") {
                self.bump()?;
                let index = self.parse_expression()?;
                self.expect("]")?;
                expr = Expression {
                    kind: ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    span: self.span_from(start),
                };
                continue;
            }

            if self.at("++") || self.at("--") {
                let op = self.bump()?.text;
                expr = Expression {
                    kind: ExprKind::Unary {
                        op: format!("{op}post"),
                        operand: Box::new(expr),
                    },
                    span: self.span_from(start),
                };
                continue;
            }

            break;
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        let start = self.pos;
        let Some(tok) = self.peek().cloned() else {
            return Err(self.eof_error("expected expression"));
        };

        match tok.kind {
            TokenKind::Number => {
                self.bump()?;
                let mut text = tok.text.clone();
                if let Some(unit) = self.peek().map(|t| t.text.clone()) {
                    if UNIT_SUFFIXES.contains(&unit.as_str()) {
                        self.bump()?;
                        text.push(' ');
                        text.push_str(&unit);
                    }
                }
                Ok(Expression {
                    kind: ExprKind::NumberLit(text),
                    span: self.span_of(&tok),
                })
            }
            TokenKind::StringLit => {
                self.bump()?;
                Ok(Expression {
                    kind: ExprKind::StringLit(tok.text.clone()),
                    span: self.span_of(&tok),
                })
            }
            TokenKind::Identifier => match tok.text.as_str() {
                "true" | "false" => {
                    self.bump()?;
                    Ok(Expression {
                        kind: ExprKind::BoolLit(tok.text == "true"),
                        span: self.span_of(&tok),
                    })
                }
                "new" => {
                    self.bump()?;
                    let type_name = self.parse_type()?;
                    Ok(Expression {
                        kind: ExprKind::New(type_name.text),
                        span: self.span_from(start),
                    })
                }
                _ => {
                    self.bump()?;
                    Ok(Expression {
                        kind: ExprKind::Identifier(tok.text.clone()),
                        span: self.span_of(&tok),
                    })
                }
            },
            TokenKind::Punct if tok.is("(") => {
                self.bump()?;
                let mut items = Vec::new();
                while !self.at(")") {
                    if self.at(",") {
                        self.bump()?;
                        continue;
                    }
                    items.push(self.parse_expression()?);
                    if !self.eat(",") {
                        break;
                    }
                }
                self.expect(")")?;
                if items.len() == 1 {
                    Ok(items.into_iter().next().unwrap())
                } else {
                    Ok(Expression {
                        kind: ExprKind::Tuple(items),
                        span: self.span_from(start),
                    })
                }
            }
            _ => Err(self.error_here(format!("unexpected token `{}`", tok.text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VULNERABLE_BANK: &str = r#"
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

    #[test]
    fn test_parse_vulnerable_bank() {
        let unit = parse_source(VULNERABLE_BANK).unwrap();
        assert_eq!(unit.pragma.as_deref(), Some("solidity ^ 0.8.0"));
        assert_eq!(unit.contracts.len(), 1);
        let contract = &unit.contracts[0];
        assert_eq!(contract.name, "VulnerableBank");
        assert_eq!(contract.state_vars.len(), 1);
        assert!(contract.state_vars[0].type_name.is_mapping);
        assert_eq!(contract.functions.len(), 1);

        let body = contract.functions[0].body.as_ref().unwrap();
        assert_eq!(body.statements.len(), 3);
        assert!(matches!(
            body.statements[0].kind,
            StatementKind::Require { .. }
        ));
    }

    #[test]
    fn test_parse_call_options() {
        let unit = parse_source(VULNERABLE_BANK).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        let StatementKind::Expr(expr) = &body.statements[1].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { options, .. } = &expr.kind else {
            panic!("expected call expression");
        };
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].0, "value");
    }

    #[test]
    fn test_parse_compound_assignment_target() {
        let unit = parse_source(VULNERABLE_BANK).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        let StatementKind::Expr(expr) = &body.statements[2].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { op, lhs, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        assert_eq!(op, "-=");
        assert_eq!(lhs.root_identifier(), Some("balances"));
    }

    #[test]
    fn test_parse_inheritance_and_imports() {
        let source = r#"
            pragma solidity ^0.8.0;
            import "./Ownable.sol";

            contract Vault is Ownable, ReentrancyGuard {
                uint public total;
                function deposit() public payable { total += msg.value; }
            }
        "#;
        let unit = parse_source(source).unwrap();
        assert_eq!(unit.imports.len(), 1);
        assert_eq!(unit.imports[0].path, "./Ownable.sol");
        assert_eq!(
            unit.contracts[0].bases,
            vec!["Ownable".to_string(), "ReentrancyGuard".to_string()]
        );
    }

    #[test]
    fn test_parse_control_flow() {
        let source = r#"
            contract Loops {
                function sum(uint n) public pure returns (uint) {
                    uint total = 0;
                    for (uint i = 0; i < n; i++) {
                        total += i;
                    }
                    if (total > 100) {
                        return 100;
                    } else {
                        return total;
                    }
                }
            }
        "#;
        let unit = parse_source(source).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        let StatementKind::For {
            init,
            condition,
            update,
            ..
        } = &body.statements[1].kind
        else {
            panic!("expected for statement");
        };
        // All three clauses land in their own slot
        assert!(matches!(
            init.as_deref(),
            Some(Statement {
                kind: StatementKind::VarDecl { .. },
                ..
            })
        ));
        assert!(condition.is_some());
        assert!(update.is_some());
        assert!(matches!(body.statements[2].kind, StatementKind::If { .. }));
    }

    #[test]
    fn test_struct_local_with_data_location() {
        let source = r#"
            contract Payments {
                struct Pending { uint amount; address to; }
                mapping(address => uint) balances;

                function queue(address to) public {
                    Pending memory p = Pending(balances[to], to);
                    balances[to] = p.amount;
                }
            }
        "#;
        let unit = parse_source(source).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        let StatementKind::VarDecl { name, initializer, .. } = &body.statements[0].kind else {
            panic!("expected declaration, got {:?}", body.statements[0].kind);
        };
        assert_eq!(name, "p");
        assert!(initializer.is_some());
    }

    #[test]
    fn test_parse_error_has_position() {
        let err = parse_source("contract Broken { function ( }").unwrap_err();
        match err {
            crate::error::AnalysisError::Parse { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 1);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_assembly_is_unsupported_not_fatal() {
        let source = r#"
            contract Asm {
                function peek() public view returns (uint x) {
                    assembly { x := sload(0) }
                }
            }
        "#;
        let unit = parse_source(source).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        assert!(matches!(
            body.statements[0].kind,
            StatementKind::Unsupported { ref construct, .. } if construct == "assembly"
        ));
    }

    #[test]
    fn test_tuple_destructuring_keeps_first_var() {
        let source = r#"
            contract Caller {
                function ping(address target) public {
                    (bool ok, ) = target.call("");
                    require(ok);
                }
            }
        "#;
        let unit = parse_source(source).unwrap();
        let body = unit.contracts[0].functions[0].body.as_ref().unwrap();
        let StatementKind::VarDecl { name, initializer, .. } = &body.statements[0].kind else {
            panic!("expected declaration");
        };
        assert_eq!(name, "ok");
        assert!(initializer.is_some());
    }
}
