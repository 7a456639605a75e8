//! SQL DDL for initializing LabGuard storage (SQLite).
//!
//! Timestamps are RFC 3339 TEXT with microsecond precision so that range
//! filters can compare strings directly.

/// SQLite schema:
/// - `equipment` soft-deleted via `status = 'RETIRED'`
/// - `calibration_records.result` holds the JSON validation result
/// - `audit_logs` is append-only; `prev_hash` links each row to the previous one
/// - `encryption_keys.wrapped_key` is the data key sealed under the master key
/// - `users.email_enc` is a JSON `EncryptedField`, NULL once erased
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS equipment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    serial_number TEXT NOT NULL UNIQUE,
    location TEXT NULL,
    calibration_interval_days INTEGER NOT NULL,
    last_calibrated_at TEXT NULL,
    next_due_at TEXT NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE'
);

CREATE TABLE IF NOT EXISTS calibration_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    equipment_id INTEGER NOT NULL REFERENCES equipment(id),
    scheduled_for TEXT NOT NULL,
    performed_at TEXT NULL,
    performed_by INTEGER NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    result TEXT NULL,
    compliance_score INTEGER NULL,
    notes TEXT NULL
);

CREATE INDEX IF NOT EXISTS idx_calibration_records_equipment ON calibration_records(equipment_id);

CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    user_id INTEGER NULL,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NULL,
    outcome TEXT NOT NULL,
    details TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    integrity_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id);

CREATE TABLE IF NOT EXISTS encryption_keys (
    key_id TEXT PRIMARY KEY,
    purpose TEXT NOT NULL,
    wrapped_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    rotated_at TEXT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_encryption_keys_purpose ON encryption_keys(purpose, active);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email_enc TEXT NULL,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL,
    anonymized INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS consents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    purpose TEXT NOT NULL,
    granted INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_consents_user ON consents(user_id);

CREATE TABLE IF NOT EXISTS privacy_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    completed_at TEXT NULL
);
"#;
