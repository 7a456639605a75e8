use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::IntegrityReport;
use crate::types::{Equipment, KeyMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceRule {
    /// CLIA 42 CFR 493.1255 / CAP: calibration must be current.
    CalibrationOverdue,
    /// Equipment pulled from service after a failed calibration.
    EquipmentOutOfService,
    /// Data-encryption key past its rotation date but still in use.
    KeyExpired,
    /// Audit hash chain does not verify.
    AuditIntegrity,
}

impl ComplianceRule {
    pub fn penalty(&self) -> u32 {
        match self {
            ComplianceRule::CalibrationOverdue => 15,
            ComplianceRule::EquipmentOutOfService => 10,
            ComplianceRule::KeyExpired => 10,
            ComplianceRule::AuditIntegrity => 25,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ComplianceRule::CalibrationOverdue => Severity::High,
            ComplianceRule::EquipmentOutOfService => Severity::Medium,
            ComplianceRule::KeyExpired => Severity::Medium,
            ComplianceRule::AuditIntegrity => Severity::Critical,
        }
    }

    pub fn reference(&self) -> &'static str {
        match self {
            ComplianceRule::CalibrationOverdue => "CLIA 42 CFR 493.1255; CAP GEN.40000",
            ComplianceRule::EquipmentOutOfService => "CLIA 42 CFR 493.1254",
            ComplianceRule::KeyExpired => "NIST SP 800-57 key cryptoperiod",
            ComplianceRule::AuditIntegrity => "45 CFR 164.312(b)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: ComplianceRule,
    pub severity: Severity,
    pub resource: String,
    pub reference: String,
    pub message: String,
}

impl Violation {
    fn new(rule: ComplianceRule, resource: String, message: String) -> Self {
        Self {
            rule,
            severity: rule.severity(),
            resource,
            reference: rule.reference().to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,
    NeedsAttention,
    NonCompliant,
}

impl ComplianceStatus {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => ComplianceStatus::Compliant,
            70..=89 => ComplianceStatus::NeedsAttention,
            _ => ComplianceStatus::NonCompliant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceCheckResult {
    pub checked_at: DateTime<Utc>,
    pub violations: Vec<Violation>,
    pub score: u32,
    pub status: ComplianceStatus,
}

/// Inputs for one compliance run, gathered by the audit service.
#[derive(Debug, Clone)]
pub struct ComplianceSnapshot {
    pub overdue_equipment: Vec<Equipment>,
    pub out_of_service: Vec<Equipment>,
    pub expired_keys: Vec<KeyMetadata>,
    pub integrity: IntegrityReport,
}

pub fn evaluate(snapshot: &ComplianceSnapshot, now: DateTime<Utc>) -> ComplianceCheckResult {
    let mut violations = Vec::new();

    for eq in &snapshot.overdue_equipment {
        let due = eq
            .next_due_at
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let days = eq
            .next_due_at
            .map(|d| (now - d).num_days())
            .unwrap_or_default();
        violations.push(Violation::new(
            ComplianceRule::CalibrationOverdue,
            format!("equipment:{}", eq.id),
            format!(
                "{} ({}) calibration was due {} ({} days overdue)",
                eq.name, eq.serial_number, due, days
            ),
        ));
    }

    for eq in &snapshot.out_of_service {
        violations.push(Violation::new(
            ComplianceRule::EquipmentOutOfService,
            format!("equipment:{}", eq.id),
            format!(
                "{} ({}) is out of service pending recalibration",
                eq.name, eq.serial_number
            ),
        ));
    }

    for key in &snapshot.expired_keys {
        violations.push(Violation::new(
            ComplianceRule::KeyExpired,
            format!("key:{}", key.key_id),
            format!(
                "{} key expired at {} and has not been rotated",
                key.purpose,
                key.expires_at.to_rfc3339()
            ),
        ));
    }

    if !snapshot.integrity.valid {
        violations.push(Violation::new(
            ComplianceRule::AuditIntegrity,
            "audit_logs".to_string(),
            format!(
                "{} tampered entries, {} broken links",
                snapshot.integrity.tampered.len(),
                snapshot.integrity.broken_links.len()
            ),
        ));
    }

    let penalty: u32 = violations.iter().map(|v| v.rule.penalty()).sum();
    let score = 100u32.saturating_sub(penalty);

    ComplianceCheckResult {
        checked_at: now,
        violations,
        score,
        status: ComplianceStatus::from_score(score),
    }
}
