use serde::Serialize;

use crate::error::CoverageFlag;
use crate::finding::{Finding, Severity};
use crate::graph::NodeId;

/// One anchored source position, rendered "Line N: <snippet>".
#[derive(Debug, Clone, Serialize)]
pub struct AnchorView {
    pub node: NodeId,
    pub line: usize,
    pub snippet: String,
}

impl std::fmt::Display for AnchorView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Line {}: {}", self.line, self.snippet)
    }
}

/// Developer view: where the problem is and how to fix it.
#[derive(Debug, Clone, Serialize)]
pub struct DeveloperFinding {
    pub title: String,
    pub severity: Severity,
    pub confidence: f64,
    pub contract: String,
    pub function: Option<String>,
    pub location: String,
    pub anchors: Vec<AnchorView>,
    pub remediation: String,
    /// Counterfactual edit set rendered as change instructions, empty when
    /// no edit set was found within budget.
    pub suggested_edits: Vec<String>,
    pub low_agreement: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeveloperReport {
    pub findings: Vec<DeveloperFinding>,
    pub coverage: Vec<CoverageFlag>,
}

/// Auditor view: evidence and model agreement for manual verification.
#[derive(Debug, Clone, Serialize)]
pub struct AuditorFinding {
    pub title: String,
    pub severity: Severity,
    pub confidence: f64,
    pub structural_confidence: f64,
    pub semantic_confidence: f64,
    pub low_agreement: bool,
    pub contract: String,
    pub function: Option<String>,
    pub attack_vector: String,
    pub rationale: String,
    /// Strongest supporting nodes first, rendered with their deltas.
    pub top_attributions: Vec<String>,
    pub attention_ranking: Vec<String>,
    pub counterfactual_found: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditorReport {
    pub findings: Vec<AuditorFinding>,
    pub coverage: Vec<CoverageFlag>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn tally(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopRisk {
    pub title: String,
    pub severity: Severity,
    pub confidence: f64,
    pub contract: String,
}

/// Manager view: portfolio-level posture, no source detail.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerReport {
    pub total_findings: usize,
    pub counts: SeverityCounts,
    /// Worst severity present, or None for a clean run.
    pub overall_risk: Option<Severity>,
    pub top_risks: Vec<TopRisk>,
}

/// All three projections over one ordered finding sequence.
#[derive(Debug, Clone, Serialize)]
pub struct ReportBundle {
    pub developer: DeveloperReport,
    pub auditor: AuditorReport,
    pub manager: ManagerReport,
}
