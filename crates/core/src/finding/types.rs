use serde::Serialize;

use crate::graph::NodeId;

use super::explanation::ExplanationBundle;

/// Severity levels ordered from least to most severe.
/// IMPORTANT: Variant order matters. Derived Ord puts Info < Low < Medium <
/// High < Critical, which report ordering and filtering rely on.
/// Do NOT reorder these variants.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

/// Open-set vulnerability taxonomy. `Other` carries a label so scorers can
/// report classes this enum does not name yet.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum VulnerabilityKind {
    Reentrancy,
    IntegerOverflow,
    AccessControl,
    UncheckedCall,
    TimestampDependence,
    DelegateCall,
    UnboundedLoop,
    Other(String),
}

impl VulnerabilityKind {
    /// Stable lowercase key, used for threshold-table lookups and config
    /// overrides.
    pub fn key(&self) -> String {
        match self {
            VulnerabilityKind::Reentrancy => "reentrancy".to_string(),
            VulnerabilityKind::IntegerOverflow => "integer-overflow".to_string(),
            VulnerabilityKind::AccessControl => "access-control".to_string(),
            VulnerabilityKind::UncheckedCall => "unchecked-call".to_string(),
            VulnerabilityKind::TimestampDependence => "timestamp-dependence".to_string(),
            VulnerabilityKind::DelegateCall => "delegate-call".to_string(),
            VulnerabilityKind::UnboundedLoop => "unbounded-loop".to_string(),
            VulnerabilityKind::Other(label) => label.to_lowercase(),
        }
    }

    /// Calibrated severity for a confirmed detection of this kind.
    pub fn severity(&self) -> Severity {
        match self {
            VulnerabilityKind::Reentrancy => Severity::Critical,
            VulnerabilityKind::DelegateCall | VulnerabilityKind::AccessControl => Severity::High,
            VulnerabilityKind::IntegerOverflow
            | VulnerabilityKind::UncheckedCall
            | VulnerabilityKind::UnboundedLoop => Severity::Medium,
            VulnerabilityKind::TimestampDependence => Severity::Low,
            VulnerabilityKind::Other(_) => Severity::Medium,
        }
    }

    pub fn title(&self) -> String {
        match self {
            VulnerabilityKind::Reentrancy => "Reentrancy".to_string(),
            VulnerabilityKind::IntegerOverflow => "Integer Overflow".to_string(),
            VulnerabilityKind::AccessControl => "Missing Access Control".to_string(),
            VulnerabilityKind::UncheckedCall => "Unchecked Low-Level Call".to_string(),
            VulnerabilityKind::TimestampDependence => "Timestamp Dependence".to_string(),
            VulnerabilityKind::DelegateCall => "Unsafe Delegatecall".to_string(),
            VulnerabilityKind::UnboundedLoop => "Unbounded Loop".to_string(),
            VulnerabilityKind::Other(label) => label.clone(),
        }
    }

    /// Remediation guidance shown on the developer view.
    pub fn remediation(&self) -> &'static str {
        match self {
            VulnerabilityKind::Reentrancy => {
                "Apply the checks-effects-interactions pattern: update contract state \
                 before making the external call, or guard the function with a \
                 reentrancy lock."
            }
            VulnerabilityKind::IntegerOverflow => {
                "Compile with Solidity >= 0.8 for checked arithmetic, or wrap the \
                 operation in a checked math library."
            }
            VulnerabilityKind::AccessControl => {
                "Restrict the function with an authorization modifier (e.g. onlyOwner) \
                 before it mutates privileged state."
            }
            VulnerabilityKind::UncheckedCall => {
                "Check the low-level call's success flag and revert on failure, or use \
                 a reverting transfer wrapper."
            }
            VulnerabilityKind::TimestampDependence => {
                "Avoid block.timestamp in security-critical conditions; miners can \
                 skew it by several seconds. Use block numbers or an oracle."
            }
            VulnerabilityKind::DelegateCall => {
                "Only delegatecall into audited, immutable implementations; never \
                 derive the target from user input."
            }
            VulnerabilityKind::UnboundedLoop => {
                "Bound the iteration count or paginate the work; a loop over \
                 unbounded storage can exceed the block gas limit."
            }
            VulnerabilityKind::Other(_) => {
                "Review the anchored statements and apply the principle of least \
                 privilege to external interactions."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct FindingFlags {
    /// The two channels disagreed beyond the divergence bound; confidence was
    /// degraded, not suppressed.
    pub low_agreement: bool,
    /// The analyzed unit carried coverage gaps (unsupported constructs or
    /// unresolved imports).
    pub degraded_coverage: bool,
    /// A counterfactual edit set was found within budget.
    pub counterfactual_found: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub kind: VulnerabilityKind,
    pub severity: Severity,
    /// Always within [0, 1].
    pub confidence: f64,
    /// Raw per-channel probabilities behind the fused confidence.
    pub structural_confidence: f64,
    pub semantic_confidence: f64,
    pub contract: String,
    pub function: Option<String>,
    /// Graph nodes the detection is anchored on, sorted by source position.
    pub anchors: Vec<NodeId>,
    pub flags: FindingFlags,
    pub explanation: ExplanationBundle,
}
