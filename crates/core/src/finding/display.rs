use std::fmt;

use super::types::{Finding, VulnerabilityKind};

impl fmt::Display for VulnerabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} in {} (confidence {:.2})",
            self.severity, self.kind, self.contract, self.confidence
        )?;
        if let Some(function) = &self.function {
            write!(f, " fn {function}")?;
        }
        Ok(())
    }
}
