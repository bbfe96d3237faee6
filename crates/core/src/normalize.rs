use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::ast::{parse_source, ContractDef, ContractKind, FunctionDef, StateVarDecl};
use crate::error::{CoverageFlag, Result};

/// Collaborator that locates import targets. The core owns no file I/O, so
/// resolution is injected; a missing target degrades the unit instead of
/// failing the run.
pub trait ImportResolver: Send + Sync {
    /// Returns the source text for an import path, or None if unknown.
    fn resolve(&self, path: &str) -> Option<String>;
}

/// Resolver that knows no imports. Every import becomes an unresolved
/// annotation on the unit.
pub struct NoImports;

impl ImportResolver for NoImports {
    fn resolve(&self, _path: &str) -> Option<String> {
        None
    }
}

/// In-memory resolver mapping import paths to source text, for callers that
/// submit multi-file contracts.
#[derive(Default)]
pub struct MemoryImports {
    sources: BTreeMap<String, String>,
}

impl MemoryImports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(path.into(), source.into());
    }
}

impl ImportResolver for MemoryImports {
    fn resolve(&self, path: &str) -> Option<String> {
        self.sources.get(path).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    StateVar,
    Function,
    Param,
    Local,
    Event,
}

#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub type_text: String,
    pub contract: String,
    /// True for contract storage (state variables); storage access aliases
    /// conservatively in the data-flow analysis.
    pub is_storage: bool,
}

/// Resolved symbols for the whole unit, keyed by qualified name
/// (`Contract::symbol`, `Contract::function::local`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolTable {
    symbols: BTreeMap<String, Symbol>,
}

impl SymbolTable {
    pub fn insert(&mut self, key: String, symbol: Symbol) {
        self.symbols.insert(key, symbol);
    }

    pub fn get(&self, key: &str) -> Option<&Symbol> {
        self.symbols.get(key)
    }

    /// Type of a name as seen from inside `contract::function`: locals and
    /// params shadow state variables.
    pub fn resolve_in_function(
        &self,
        contract: &str,
        function: &str,
        name: &str,
    ) -> Option<&Symbol> {
        self.symbols
            .get(&format!("{contract}::{function}::{name}"))
            .or_else(|| self.symbols.get(&format!("{contract}::{name}")))
    }

    pub fn is_storage(&self, contract: &str, function: &str, name: &str) -> bool {
        self.resolve_in_function(contract, function, name)
            .is_some_and(|s| s.is_storage)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// One normalized compilation unit: canonical source, flattened inheritance,
/// resolved symbols. Immutable once produced; every later stage borrows it.
#[derive(Debug)]
pub struct CanonicalUnit {
    pub source: String,
    pub version_hint: Option<String>,
    /// Contracts with inherited members merged in, derived overrides winning.
    pub contracts: Vec<ContractDef>,
    /// Flattened inheritance order per contract, parents first.
    pub inheritance: BTreeMap<String, Vec<String>>,
    pub symbols: SymbolTable,
    pub coverage: Vec<CoverageFlag>,
}

impl CanonicalUnit {
    /// True when the pragma (or submitted hint) selects a compiler with
    /// checked arithmetic (>= 0.8).
    pub fn checked_arithmetic(&self) -> bool {
        let Some(hint) = &self.version_hint else {
            return true;
        };
        let digits: Vec<u32> = hint
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        match (digits.first(), digits.get(1)) {
            (Some(0), Some(minor)) => *minor >= 8,
            (Some(major), _) => *major >= 1,
            _ => true,
        }
    }

    pub fn contract(&self, name: &str) -> Option<&ContractDef> {
        self.contracts.iter().find(|c| c.name == name)
    }
}

/// Parse and normalize contract source into a [`CanonicalUnit`].
///
/// Syntactic failure in the submitted source is fatal (`ParseError`).
/// An import that cannot be resolved, or an imported file that fails to
/// parse, annotates the unit and the run continues with what resolved.
pub fn normalize(
    source: &str,
    version_hint: Option<&str>,
    resolver: &dyn ImportResolver,
) -> Result<CanonicalUnit> {
    let unit = parse_source(source)?;
    let mut coverage = Vec::new();

    // Pool of contracts visible for inheritance: imported units first, the
    // submitted unit last so same-name local definitions win.
    let mut pool: Vec<ContractDef> = Vec::new();
    for import in &unit.imports {
        match resolver.resolve(&import.path) {
            Some(imported_source) => match parse_source(&imported_source) {
                Ok(imported) => pool.extend(imported.contracts),
                Err(err) => {
                    debug!(path = %import.path, %err, "imported unit failed to parse");
                    coverage.push(CoverageFlag::UnresolvedImport {
                        path: import.path.clone(),
                    });
                }
            },
            None => {
                coverage.push(CoverageFlag::UnresolvedImport {
                    path: import.path.clone(),
                });
            }
        }
    }
    pool.extend(unit.contracts.iter().cloned());

    let mut inheritance = BTreeMap::new();
    let mut flattened = Vec::new();
    for contract in &unit.contracts {
        let chain = linearize(contract, &pool);
        let merged = flatten(contract, &chain, &pool);
        inheritance.insert(contract.name.clone(), chain);
        flattened.push(merged);
    }

    let symbols = build_symbol_table(&flattened);

    Ok(CanonicalUnit {
        source: source.to_string(),
        version_hint: version_hint
            .map(str::to_string)
            .or_else(|| unit.pragma.clone()),
        contracts: flattened,
        inheritance,
        symbols,
        coverage,
    })
}

/// Parent-before-child order over the base list, depth first. Full C3
/// linearization is not needed for the modeled subset; duplicates keep their
/// first (most-base) occurrence.
fn linearize(contract: &ContractDef, pool: &[ContractDef]) -> Vec<String> {
    let mut chain = Vec::new();
    let mut stack: Vec<&str> = contract.bases.iter().map(String::as_str).rev().collect();
    while let Some(base_name) = stack.pop() {
        if chain.iter().any(|n| n == base_name) {
            continue;
        }
        if let Some(base) = pool.iter().find(|c| c.name == base_name) {
            for grand in base.bases.iter().rev() {
                stack.push(grand);
            }
            chain.push(base_name.to_string());
        }
    }
    chain.push(contract.name.clone());
    chain
}

fn flatten(contract: &ContractDef, chain: &[String], pool: &[ContractDef]) -> ContractDef {
    let mut state_vars: Vec<StateVarDecl> = Vec::new();
    let mut functions: Vec<FunctionDef> = Vec::new();
    let mut events = Vec::new();

    for name in chain {
        let Some(def) = pool.iter().find(|c| &c.name == name) else {
            continue;
        };
        for var in &def.state_vars {
            state_vars.retain(|v| v.name != var.name);
            state_vars.push(var.clone());
        }
        for func in &def.functions {
            // Derived overrides replace base definitions with the same name
            functions.retain(|f| f.name != func.name);
            functions.push(func.clone());
        }
        for event in &def.events {
            events.push(event.clone());
        }
    }

    ContractDef {
        name: contract.name.clone(),
        kind: contract.kind,
        bases: contract.bases.clone(),
        state_vars,
        functions,
        events,
        span: contract.span,
    }
}

fn build_symbol_table(contracts: &[ContractDef]) -> SymbolTable {
    let mut table = SymbolTable::default();
    for contract in contracts {
        if contract.kind == ContractKind::Interface {
            continue;
        }
        for var in &contract.state_vars {
            table.insert(
                format!("{}::{}", contract.name, var.name),
                Symbol {
                    name: var.name.clone(),
                    kind: SymbolKind::StateVar,
                    type_text: var.type_name.text.clone(),
                    contract: contract.name.clone(),
                    is_storage: true,
                },
            );
        }
        for event in &contract.events {
            table.insert(
                format!("{}::{}", contract.name, event.name),
                Symbol {
                    name: event.name.clone(),
                    kind: SymbolKind::Event,
                    type_text: "event".to_string(),
                    contract: contract.name.clone(),
                    is_storage: false,
                },
            );
        }
        for func in &contract.functions {
            let signature = format!(
                "{}({})",
                func.name,
                func.params
                    .iter()
                    .map(|p| p.type_name.text.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            table.insert(
                format!("{}::{}", contract.name, func.name),
                Symbol {
                    name: func.name.clone(),
                    kind: SymbolKind::Function,
                    type_text: signature,
                    contract: contract.name.clone(),
                    is_storage: false,
                },
            );
            for param in &func.params {
                if param.name.is_empty() {
                    continue;
                }
                table.insert(
                    format!("{}::{}::{}", contract.name, func.name, param.name),
                    Symbol {
                        name: param.name.clone(),
                        kind: SymbolKind::Param,
                        type_text: param.type_name.text.clone(),
                        contract: contract.name.clone(),
                        is_storage: false,
                    },
                );
            }
            if let Some(body) = &func.body {
                collect_locals(&contract.name, &func.name, body, &mut table);
            }
        }
    }
    table
}

fn collect_locals(
    contract: &str,
    function: &str,
    block: &crate::ast::Block,
    table: &mut SymbolTable,
) {
    use crate::ast::StatementKind;
    for stmt in &block.statements {
        match &stmt.kind {
            StatementKind::VarDecl {
                name, type_name, ..
            } => {
                table.insert(
                    format!("{contract}::{function}::{name}"),
                    Symbol {
                        name: name.clone(),
                        kind: SymbolKind::Local,
                        type_text: type_name.text.clone(),
                        contract: contract.to_string(),
                        is_storage: false,
                    },
                );
            }
            StatementKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_locals(contract, function, then_branch, table);
                if let Some(else_branch) = else_branch {
                    collect_locals(contract, function, else_branch, table);
                }
            }
            StatementKind::While { body, .. } => collect_locals(contract, function, body, table),
            StatementKind::For { init, body, .. } => {
                if let Some(init) = init {
                    if let StatementKind::VarDecl {
                        name, type_name, ..
                    } = &init.kind
                    {
                        table.insert(
                            format!("{contract}::{function}::{name}"),
                            Symbol {
                                name: name.clone(),
                                kind: SymbolKind::Local,
                                type_text: type_name.text.clone(),
                                contract: contract.to_string(),
                                is_storage: false,
                            },
                        );
                    }
                }
                collect_locals(contract, function, body, table);
            }
            StatementKind::Block(inner) => collect_locals(contract, function, inner, table),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resolves_storage_symbols() {
        let source = r#"
            contract Bank {
                mapping(address => uint) balances;
                function withdraw(uint amount) public {
                    balances[msg.sender] -= amount;
                }
            }
        "#;
        let unit = normalize(source, None, &NoImports).unwrap();
        assert!(unit.symbols.is_storage("Bank", "withdraw", "balances"));
        assert!(!unit.symbols.is_storage("Bank", "withdraw", "amount"));
    }

    #[test]
    fn test_unresolved_import_degrades_not_fails() {
        let source = r#"
            import "./Missing.sol";
            contract C { uint x; }
        "#;
        let unit = normalize(source, None, &NoImports).unwrap();
        assert_eq!(unit.coverage.len(), 1);
        assert!(matches!(
            unit.coverage[0],
            CoverageFlag::UnresolvedImport { ref path } if path == "./Missing.sol"
        ));
        assert_eq!(unit.contracts.len(), 1);
    }

    #[test]
    fn test_inheritance_flattening_child_overrides() {
        let mut imports = MemoryImports::new();
        imports.insert(
            "./Base.sol",
            r#"
                contract Base {
                    uint public total;
                    function touch() public { total = 1; }
                    function keepMe() public { total = 2; }
                }
            "#,
        );
        let source = r#"
            import "./Base.sol";
            contract Child is Base {
                function touch() public { total = 3; }
            }
        "#;
        let unit = normalize(source, None, &imports).unwrap();
        let child = unit.contract("Child").unwrap();
        // Base state var inherited, both functions present, override wins
        assert_eq!(child.state_vars.len(), 1);
        assert_eq!(child.functions.len(), 2);
        assert_eq!(
            unit.inheritance["Child"],
            vec!["Base".to_string(), "Child".to_string()]
        );
    }

    #[test]
    fn test_checked_arithmetic_from_pragma() {
        let v8 = normalize("pragma solidity ^0.8.0; contract C { uint x; }", None, &NoImports)
            .unwrap();
        assert!(v8.checked_arithmetic());
        let v7 = normalize("pragma solidity ^0.7.6; contract C { uint x; }", None, &NoImports)
            .unwrap();
        assert!(!v7.checked_arithmetic());
    }

    #[test]
    fn test_version_hint_overrides_pragma() {
        let unit = normalize(
            "pragma solidity ^0.8.0; contract C { uint x; }",
            Some("0.6.12"),
            &NoImports,
        )
        .unwrap();
        assert!(!unit.checked_arithmetic());
    }
}
