use std::collections::{BTreeSet, HashMap};

use super::cfg::{ControlEdgeKind, ControlFlowGraph, StmtArena, StmtId};

/// Def-use edges: variable's last write(s) to each read reachable without an
/// intervening strong write. Storage accessed through mappings/arrays is
/// aliased conservatively: a weak write adds a definition without killing
/// earlier ones, so ambiguous aliases over-approximate (an edge to every
/// candidate definition, never none).
#[derive(Debug, Default)]
pub struct DataFlowGraph {
    /// (definition site, use site, variable name)
    pub edges: Vec<(StmtId, StmtId, String)>,
}

impl DataFlowGraph {
    pub fn defs_reaching(&self, use_site: StmtId) -> impl Iterator<Item = StmtId> + '_ {
        self.edges
            .iter()
            .filter(move |(_, u, _)| *u == use_site)
            .map(|(d, _, _)| *d)
    }
}

/// Reaching-definitions fixpoint per function over the statement-level CFG.
/// Call edges are excluded: definitions do not flow across function
/// boundaries at this stage.
pub fn build(arena: &StmtArena, cfg: &ControlFlowGraph) -> DataFlowGraph {
    let mut dfg = DataFlowGraph::default();

    for func in &cfg.functions {
        // OUT sets as sorted pairs for deterministic iteration
        let mut out: HashMap<StmtId, BTreeSet<(String, StmtId)>> = HashMap::new();
        for &id in &func.statements {
            out.insert(id, BTreeSet::new());
        }

        let intra_preds = |id: StmtId| -> Vec<StmtId> {
            cfg.edges
                .iter()
                .filter(|(_, t, k)| *t == id && *k != ControlEdgeKind::Call)
                .map(|(f, _, _)| *f)
                .filter(|f| func.statements.contains(f))
                .collect()
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &id in &func.statements {
                let mut in_set: BTreeSet<(String, StmtId)> = BTreeSet::new();
                for pred in intra_preds(id) {
                    if let Some(pred_out) = out.get(&pred) {
                        in_set.extend(pred_out.iter().cloned());
                    }
                }

                let node = arena.get(id);
                let mut out_set = in_set;
                for write in &node.facts.writes {
                    if !write.is_weak {
                        // Strong update kills earlier definitions of the name
                        out_set.retain(|(name, _)| name != &write.name);
                    }
                    out_set.insert((write.name.clone(), id));
                }

                if out.get(&id) != Some(&out_set) {
                    out.insert(id, out_set);
                    changed = true;
                }
            }
        }

        // Def-use edges from the IN set of each reading statement
        for &id in &func.statements {
            let node = arena.get(id);
            if node.facts.reads.is_empty() {
                continue;
            }
            let mut in_set: BTreeSet<(String, StmtId)> = BTreeSet::new();
            for pred in intra_preds(id) {
                if let Some(pred_out) = out.get(&pred) {
                    in_set.extend(pred_out.iter().cloned());
                }
            }
            for read in &node.facts.reads {
                for (name, def) in &in_set {
                    if name == &read.name {
                        dfg.edges.push((*def, id, name.clone()));
                    }
                }
            }
        }
    }

    dfg
}

#[cfg(test)]
mod tests {
    use crate::flow::analyze_flows;
    use crate::normalize::{normalize, NoImports};

    #[test]
    fn test_def_use_chain_through_straight_line() {
        let artifacts = analyze_flows(
            &normalize(
                r#"
                contract C {
                    function f() public pure returns (uint) {
                        uint a = 1;
                        uint b = a + 2;
                        return b;
                    }
                }
            "#,
                None,
                &NoImports,
            )
            .unwrap(),
        );
        // a's decl -> b's decl, b's decl -> return
        assert!(artifacts
            .dfg
            .edges
            .iter()
            .any(|(_, _, name)| name == "a"));
        assert!(artifacts
            .dfg
            .edges
            .iter()
            .any(|(_, _, name)| name == "b"));
    }

    #[test]
    fn test_strong_write_kills_earlier_def() {
        let artifacts = analyze_flows(
            &normalize(
                r#"
                contract C {
                    function f() public pure returns (uint) {
                        uint a = 1;
                        a = 2;
                        return a;
                    }
                }
            "#,
                None,
                &NoImports,
            )
            .unwrap(),
        );
        let func = artifacts.cfg.function("C", "f").unwrap();
        let return_id = *func.statements.last().unwrap();
        let defs: Vec<_> = artifacts.dfg.defs_reaching(return_id).collect();
        // Only the second assignment reaches the return
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn test_weak_mapping_write_preserves_aliases() {
        let artifacts = analyze_flows(
            &normalize(
                r#"
                contract C {
                    mapping(address => uint) balances;
                    function g(address a, address b) public returns (uint) {
                        balances[a] = 1;
                        balances[b] = 2;
                        return balances[a];
                    }
                }
            "#,
                None,
                &NoImports,
            )
            .unwrap(),
        );
        let func = artifacts.cfg.function("C", "g").unwrap();
        // The read sees every candidate definition: ambiguous mapping keys
        // never kill each other
        let last = *func.statements.last().unwrap();
        let defs: Vec<_> = artifacts
            .dfg
            .edges
            .iter()
            .filter(|(_, u, name)| *u == last && name == "balances")
            .collect();
        assert!(defs.len() >= 2, "weak writes must not kill aliases");
    }

    #[test]
    fn test_branch_merges_both_defs() {
        let artifacts = analyze_flows(
            &normalize(
                r#"
                contract C {
                    function f(bool c) public pure returns (uint) {
                        uint a = 0;
                        if (c) {
                            a = 1;
                        } else {
                            a = 2;
                        }
                        return a;
                    }
                }
            "#,
                None,
                &NoImports,
            )
            .unwrap(),
        );
        let func = artifacts.cfg.function("C", "f").unwrap();
        let return_id = *func.statements.last().unwrap();
        let defs: Vec<_> = artifacts.dfg.defs_reaching(return_id).collect();
        // Both branch assignments reach the merged return
        assert_eq!(defs.len(), 2);
    }
}
