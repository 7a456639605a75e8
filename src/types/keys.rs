use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data-encryption key metadata. Never carries key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl KeyMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A field sealed under a managed data key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub key_id: String,
    pub nonce: String,
    pub ciphertext: String,
}
