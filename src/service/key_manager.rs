use std::collections::BTreeSet;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::crypto::SecretKey;
use crate::crypto::cipher::{self, NONCE_LEN};
use crate::db::{DbEncryptionKey, Storage};
use crate::error::LabGuardError;
use crate::service::AuditService;
use crate::types::timestamp;
use crate::types::{AuditEvent, EncryptedField, KeyMetadata};

const MAX_PURPOSE_LEN: usize = 64;

/// Data-encryption keys, wrapped under a master key derived from the
/// configured secret. Rotation retires keys but never re-encrypts data;
/// retired keys stay available for decryption.
#[derive(Clone)]
pub struct KeyManager {
    storage: Storage,
    master: Arc<SecretKey>,
    rotation_period: Duration,
    audit: AuditService,
    // Keeps generate/rotate for a purpose from racing into two active keys.
    rotation_lock: Arc<Mutex<()>>,
}

impl KeyManager {
    pub fn new(
        storage: Storage,
        master_secret: &[u8],
        master_salt: &[u8],
        iterations: u32,
        rotation_period: Duration,
        audit: AuditService,
    ) -> Self {
        let master = cipher::derive_key(master_secret, master_salt, iterations);
        Self {
            storage,
            master: Arc::new(master),
            rotation_period,
            audit,
            rotation_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create the first active key for `purpose`. A purpose that already
    /// has an active key must be rotated instead.
    pub async fn generate(&self, purpose: &str) -> Result<KeyMetadata, LabGuardError> {
        validate_purpose(purpose)?;
        let _guard = self.rotation_lock.lock().await;
        if let Some(existing) = self.storage.active_key(purpose).await? {
            return Err(LabGuardError::InvalidInput(format!(
                "purpose `{purpose}` already has active key {}; rotate it instead",
                existing.key_id
            )));
        }
        let (row, _) = self.insert_new_key(purpose).await?;
        info!(key_id = %row.key_id, purpose = %purpose, "data key generated");
        Ok(row.into())
    }

    /// Newest active key for `purpose`, generating one on first use.
    pub async fn active_key(&self, purpose: &str) -> Result<KeyMetadata, LabGuardError> {
        let (row, _) = self.active_material(purpose).await?;
        Ok(row.into())
    }

    /// Unwrap any key, active or retired.
    pub async fn key_by_id(
        &self,
        key_id: &str,
    ) -> Result<(KeyMetadata, SecretKey), LabGuardError> {
        let row = self
            .storage
            .get_key(key_id)
            .await?
            .ok_or_else(|| LabGuardError::not_found("encryption key", key_id))?;
        let key = self.unwrap_key(&row)?;
        Ok((row.into(), key))
    }

    pub async fn rotate(&self, purpose: &str) -> Result<KeyMetadata, LabGuardError> {
        validate_purpose(purpose)?;
        let _guard = self.rotation_lock.lock().await;
        let now = timestamp::now();
        let (row, _) = self.new_key(purpose, now)?;

        let mut tx = self.audit.begin().await?;
        let retired = Storage::rotate_key(tx.conn(), &row, now).await?;
        tx.append(
            AuditEvent::new("key.rotate", "encryption_key")
                .resource(&row.key_id)
                .details(json!({ "purpose": purpose, "retired": retired })),
        )
        .await?;
        tx.commit().await?;

        info!(
            key_id = %row.key_id,
            purpose = %purpose,
            retired = retired.len(),
            "data key rotated"
        );
        Ok(row.into())
    }

    /// Rotate every purpose whose active key has expired at `now`.
    pub async fn rotate_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<KeyMetadata>, LabGuardError> {
        let purposes: BTreeSet<String> = self
            .storage
            .list_expired_active_keys(now)
            .await?
            .into_iter()
            .map(|k| k.purpose)
            .collect();

        let mut rotated = Vec::with_capacity(purposes.len());
        for purpose in purposes {
            rotated.push(self.rotate(&purpose).await?);
        }
        Ok(rotated)
    }

    pub async fn list(&self) -> Result<Vec<KeyMetadata>, LabGuardError> {
        Ok(self
            .storage
            .list_keys()
            .await?
            .into_iter()
            .map(KeyMetadata::from)
            .collect())
    }

    pub async fn encrypt_field(
        &self,
        purpose: &str,
        plaintext: &str,
    ) -> Result<EncryptedField, LabGuardError> {
        let (row, key) = self.active_material(purpose).await?;
        let (nonce, ciphertext) = cipher::seal(&key, plaintext.as_bytes(), row.key_id.as_bytes())?;
        Ok(EncryptedField {
            key_id: row.key_id,
            nonce: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
        })
    }

    pub async fn decrypt_field(&self, field: &EncryptedField) -> Result<String, LabGuardError> {
        let (_, key) = self.key_by_id(&field.key_id).await?;
        let nonce = decode_b64(&field.nonce)?;
        let ciphertext = decode_b64(&field.ciphertext)?;
        let plain = cipher::open(&key, &nonce, &ciphertext, field.key_id.as_bytes())?;
        String::from_utf8(plain)
            .map_err(|_| LabGuardError::Crypto("plaintext is not valid UTF-8".to_string()))
    }

    async fn active_material(
        &self,
        purpose: &str,
    ) -> Result<(DbEncryptionKey, SecretKey), LabGuardError> {
        validate_purpose(purpose)?;
        if let Some(row) = self.storage.active_key(purpose).await? {
            let key = self.unwrap_key(&row)?;
            return Ok((row, key));
        }

        let _guard = self.rotation_lock.lock().await;
        // Another task may have generated it while we waited.
        if let Some(row) = self.storage.active_key(purpose).await? {
            let key = self.unwrap_key(&row)?;
            return Ok((row, key));
        }
        let (row, key) = self.insert_new_key(purpose).await?;
        info!(key_id = %row.key_id, purpose = %purpose, "data key generated on first use");
        Ok((row, key))
    }

    /// Store a new active key with its audit entry. Callers hold `rotation_lock`.
    async fn insert_new_key(
        &self,
        purpose: &str,
    ) -> Result<(DbEncryptionKey, SecretKey), LabGuardError> {
        let (row, key) = self.new_key(purpose, timestamp::now())?;
        let mut tx = self.audit.begin().await?;
        Storage::insert_key(tx.conn(), &row).await?;
        tx.append(
            AuditEvent::new("key.generate", "encryption_key")
                .resource(&row.key_id)
                .details(json!({ "purpose": purpose })),
        )
        .await?;
        tx.commit().await?;
        Ok((row, key))
    }

    fn new_key(
        &self,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> Result<(DbEncryptionKey, SecretKey), LabGuardError> {
        let expires_at = now.checked_add_signed(self.rotation_period).ok_or_else(|| {
            LabGuardError::Config("key rotation period is out of range".to_string())
        })?;
        let key = SecretKey::generate();
        let key_id = Uuid::new_v4().to_string();
        let wrapped_key = self.wrap(&key_id, &key)?;
        let row = DbEncryptionKey {
            key_id,
            purpose: purpose.to_string(),
            wrapped_key,
            created_at: now,
            expires_at,
            rotated_at: None,
            active: true,
        };
        Ok((row, key))
    }

    /// `base64(nonce || ciphertext)`, bound to the key id.
    fn wrap(&self, key_id: &str, key: &SecretKey) -> Result<String, LabGuardError> {
        let (nonce, ciphertext) = cipher::seal(&self.master, key.as_bytes(), key_id.as_bytes())?;
        let mut buf = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        buf.extend_from_slice(&nonce);
        buf.extend_from_slice(&ciphertext);
        Ok(B64.encode(buf))
    }

    fn unwrap_key(&self, row: &DbEncryptionKey) -> Result<SecretKey, LabGuardError> {
        let raw = decode_b64(&row.wrapped_key)?;
        if raw.len() <= NONCE_LEN {
            return Err(LabGuardError::Crypto("wrapped key is truncated".to_string()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plain = cipher::open(&self.master, nonce, ciphertext, row.key_id.as_bytes())?;
        SecretKey::from_slice(&plain)
    }
}

fn validate_purpose(purpose: &str) -> Result<(), LabGuardError> {
    let ok = !purpose.is_empty()
        && purpose.len() <= MAX_PURPOSE_LEN
        && purpose
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(LabGuardError::InvalidInput(format!(
            "invalid key purpose `{purpose}`"
        )))
    }
}

fn decode_b64(s: &str) -> Result<Vec<u8>, LabGuardError> {
    B64.decode(s)
        .map_err(|_| LabGuardError::Crypto("invalid base64".to_string()))
}
