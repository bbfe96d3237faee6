use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Fatal pipeline errors. A fatal error aborts the run: no partial finding
/// set is ever returned alongside one of these.
///
/// Degraded conditions (unsupported constructs, unresolved imports, a
/// counterfactual search that exhausts its budget) are NOT errors; they are
/// recorded as [`CoverageFlag`]s or finding flags and the run continues.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("analysis timed out after {elapsed:?} (budget {budget:?})")]
    Timeout { elapsed: Duration, budget: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AnalysisError {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Non-fatal degradation markers attached to analysis artifacts.
/// Every one of these must surface in the emitted findings' metadata so a
/// consumer can tell a fully-covered run from a degraded one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CoverageFlag {
    /// A construct outside the modeled Solidity subset was skipped over;
    /// the surrounding function carries a partial CFG/DFG.
    UnsupportedConstruct { construct: String, line: usize },
    /// An import target could not be located; symbols from it are unresolved.
    UnresolvedImport { path: String },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Run budget, checked at pipeline suspension points. Exceeding it is fatal:
/// the whole run aborts, partial results are discarded.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: std::time::Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: std::time::Instant::now(),
            budget,
        }
    }

    pub fn check(&self) -> Result<()> {
        let elapsed = self.started.elapsed();
        if elapsed > self.budget {
            return Err(AnalysisError::Timeout {
                elapsed,
                budget: self.budget,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_carries_position() {
        let err = AnalysisError::parse(8, 12, "unexpected token");
        let msg = err.to_string();
        assert!(msg.contains("8:12"));
        assert!(msg.contains("unexpected token"));
    }
}
