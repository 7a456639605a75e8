use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AuditEntry, CalibrationRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "technician".to_string()
}

/// User profile with PII already decrypted (or removed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub anonymized: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: i64,
    pub user_id: i64,
    pub purpose: String,
    pub granted: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Latest consent decision for one purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentState {
    pub purpose: String,
    pub granted: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataExport {
    pub exported_at: DateTime<Utc>,
    pub user: User,
    pub consents: Vec<ConsentRecord>,
    pub audit_entries: Vec<AuditEntry>,
    pub calibration_records: Vec<CalibrationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErasureReceipt {
    pub request_id: i64,
    pub user_id: i64,
    pub consents_removed: u64,
    pub completed_at: DateTime<Utc>,
}
