pub mod compliance;
pub mod entry;
pub mod report;

pub use compliance::{
    ComplianceCheckResult, ComplianceRule, ComplianceSnapshot, ComplianceStatus, Severity,
    Violation, evaluate,
};
pub use entry::{GENESIS_HASH, IntegrityReport, seal, verify_chain};
pub use report::{ComplianceReport, ControlResult, Framework, ReportEvidence, build_report};
