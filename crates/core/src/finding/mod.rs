mod display;
mod explanation;
mod types;

pub use explanation::{
    AttentionEntry, AttributionEntry, Counterfactual, CounterfactualEdit, ExplanationBundle,
};
pub use types::{Finding, FindingFlags, Severity, VulnerabilityKind};
