mod synth;
mod types;

pub use synth::{order_findings, synthesize};
pub use types::{
    AnchorView, AuditorFinding, AuditorReport, DeveloperFinding, DeveloperReport, ManagerReport,
    ReportBundle, SeverityCounts, TopRisk,
};
