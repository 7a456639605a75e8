use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::KeyMetadata;

/// Row of `encryption_keys`, including the wrapped key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbEncryptionKey {
    pub key_id: String,
    pub purpose: String,
    /// base64(nonce || ciphertext) under the master key.
    pub wrapped_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl From<DbEncryptionKey> for KeyMetadata {
    fn from(d: DbEncryptionKey) -> Self {
        KeyMetadata {
            key_id: d.key_id,
            purpose: d.purpose,
            created_at: d.created_at,
            expires_at: d.expires_at,
            rotated_at: d.rotated_at,
            active: d.active,
        }
    }
}

/// Row of `users` with the email still sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbUser {
    pub id: i64,
    pub email_enc: Option<String>,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub anonymized: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyRequestKind {
    Export,
    Erasure,
    Anonymization,
}

impl PrivacyRequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyRequestKind::Export => "export",
            PrivacyRequestKind::Erasure => "erasure",
            PrivacyRequestKind::Anonymization => "anonymization",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbPrivacyRequest {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
