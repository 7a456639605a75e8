use std::collections::BTreeMap;

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::db::{DbUser, PrivacyRequestKind, Storage};
use crate::error::LabGuardError;
use crate::service::{AuditService, KeyManager};
use crate::types::timestamp;
use crate::types::{
    AuditEvent, ConsentRecord, ConsentState, DataExport, EncryptedField,
    ErasureReceipt, NewUser, User,
};

/// Key purpose for personal data columns.
pub const PII_PURPOSE: &str = "pii";

const ERASED_NAME: &str = "[erased]";

/// GDPR data-subject rights over LabGuard users.
#[derive(Clone)]
pub struct PrivacyService {
    storage: Storage,
    keys: KeyManager,
    audit: AuditService,
}

impl PrivacyService {
    pub fn new(storage: Storage, keys: KeyManager, audit: AuditService) -> Self {
        Self {
            storage,
            keys,
            audit,
        }
    }

    pub async fn register_user(&self, new: NewUser) -> Result<User, LabGuardError> {
        let email = new.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(LabGuardError::InvalidInput("a valid email is required".to_string()));
        }
        if new.name.trim().is_empty() {
            return Err(LabGuardError::InvalidInput("name is required".to_string()));
        }

        let field = self.keys.encrypt_field(PII_PURPOSE, email).await?;
        let email_enc = serde_json::to_string(&field)?;
        let created_at = timestamp::now();

        let mut tx = self.audit.begin().await?;
        let id =
            Storage::insert_user(tx.conn(), Some(&email_enc), &new.name, &new.role, created_at)
                .await?;
        tx.append(
            AuditEvent::new("user.register", "user")
                .resource(id)
                .details(json!({ "role": new.role })),
        )
        .await?;
        tx.commit().await?;

        info!(user_id = id, role = %new.role, "user registered");

        Ok(User {
            id,
            email: Some(email.to_string()),
            name: new.name,
            role: new.role,
            created_at,
            anonymized: false,
            deleted: false,
        })
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User, LabGuardError> {
        let row = self.load(user_id).await?;
        self.decrypt_user(row).await
    }

    /// Everything held about a user (Art. 15 / 20).
    pub async fn export(&self, user_id: i64) -> Result<DataExport, LabGuardError> {
        let requested_at = timestamp::now();
        let user = self.get_user(user_id).await?;
        let consents = self.storage.list_consents(user_id).await?;
        let audit_entries = self.storage.audit_entries_for_user(user_id).await?;
        let calibration_records = self.storage.list_records_performed_by(user_id).await?;

        let exported_at = timestamp::now();
        let mut tx = self.audit.begin().await?;
        let request_id = Storage::insert_privacy_request(
            tx.conn(),
            user_id,
            PrivacyRequestKind::Export,
            requested_at,
        )
        .await?;
        Storage::complete_privacy_request(tx.conn(), request_id, exported_at).await?;
        tx.append(
            AuditEvent::new("privacy.export", "user")
                .resource(user_id)
                .user(Some(user_id))
                .details(json!({
                    "request_id": request_id,
                    "audit_entries": audit_entries.len(),
                })),
        )
        .await?;
        tx.commit().await?;

        Ok(DataExport {
            exported_at,
            user,
            consents,
            audit_entries,
            calibration_records,
        })
    }

    /// Right to erasure (Art. 17). Audit entries stay, referencing only the id.
    /// The request, the scrub and its audit entry commit together.
    pub async fn erase(&self, user_id: i64) -> Result<ErasureReceipt, LabGuardError> {
        let row = self.load(user_id).await?;
        let requested_at = timestamp::now();

        let mut tx = self.audit.begin().await?;
        let request_id = Storage::insert_privacy_request(
            tx.conn(),
            user_id,
            PrivacyRequestKind::Erasure,
            requested_at,
        )
        .await?;
        Storage::update_user_pii(tx.conn(), user_id, None, ERASED_NAME, row.anonymized, true)
            .await?;
        let consents_removed = Storage::delete_consents(tx.conn(), user_id).await?;
        let completed_at = timestamp::now();
        Storage::complete_privacy_request(tx.conn(), request_id, completed_at).await?;
        tx.append(
            AuditEvent::new("privacy.erase", "user")
                .resource(user_id)
                .details(json!({
                    "request_id": request_id,
                    "consents_removed": consents_removed,
                })),
        )
        .await?;
        tx.commit().await?;

        info!(user_id, request_id, consents_removed, "user data erased");

        Ok(ErasureReceipt {
            request_id,
            user_id,
            consents_removed,
            completed_at,
        })
    }

    /// Replace identifying fields with a stable pseudonym.
    pub async fn anonymize(&self, user_id: i64) -> Result<User, LabGuardError> {
        let row = self.load(user_id).await?;
        let now = timestamp::now();
        let name = pseudonym(user_id);

        let mut tx = self.audit.begin().await?;
        let request_id = Storage::insert_privacy_request(
            tx.conn(),
            user_id,
            PrivacyRequestKind::Anonymization,
            now,
        )
        .await?;
        Storage::update_user_pii(tx.conn(), user_id, None, &name, true, row.deleted).await?;
        Storage::complete_privacy_request(tx.conn(), request_id, timestamp::now()).await?;
        tx.append(
            AuditEvent::new("privacy.anonymize", "user")
                .resource(user_id)
                .details(json!({ "request_id": request_id })),
        )
        .await?;
        tx.commit().await?;

        Ok(User {
            id: row.id,
            email: None,
            name,
            role: row.role,
            created_at: row.created_at,
            anonymized: true,
            deleted: row.deleted,
        })
    }

    pub async fn record_consent(
        &self,
        user_id: i64,
        purpose: &str,
        granted: bool,
    ) -> Result<ConsentRecord, LabGuardError> {
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(LabGuardError::InvalidInput("consent purpose is required".to_string()));
        }
        let row = self.load(user_id).await?;
        if row.deleted {
            return Err(LabGuardError::InvalidInput(format!(
                "user {user_id} has been erased"
            )));
        }

        let recorded_at = timestamp::now();
        let action = if granted { "consent.grant" } else { "consent.revoke" };

        let mut tx = self.audit.begin().await?;
        let id = Storage::insert_consent(tx.conn(), user_id, purpose, granted, recorded_at).await?;
        tx.append(
            AuditEvent::new(action, "consent")
                .resource(id)
                .user(Some(user_id))
                .details(json!({ "purpose": purpose })),
        )
        .await?;
        tx.commit().await?;

        Ok(ConsentRecord {
            id,
            user_id,
            purpose: purpose.to_string(),
            granted,
            recorded_at,
        })
    }

    /// Latest decision per purpose.
    pub async fn consents(&self, user_id: i64) -> Result<Vec<ConsentState>, LabGuardError> {
        self.load(user_id).await?;
        let history = self.storage.list_consents(user_id).await?;
        let mut latest: BTreeMap<String, ConsentState> = BTreeMap::new();
        for c in history {
            latest.insert(
                c.purpose.clone(),
                ConsentState {
                    purpose: c.purpose,
                    granted: c.granted,
                    updated_at: c.recorded_at,
                },
            );
        }
        Ok(latest.into_values().collect())
    }

    pub async fn has_consent(&self, user_id: i64, purpose: &str) -> Result<bool, LabGuardError> {
        Ok(self
            .consents(user_id)
            .await?
            .iter()
            .any(|c| c.purpose == purpose && c.granted))
    }

    async fn load(&self, user_id: i64) -> Result<DbUser, LabGuardError> {
        self.storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| LabGuardError::not_found("user", user_id))
    }

    async fn decrypt_user(&self, row: DbUser) -> Result<User, LabGuardError> {
        let email = match row.email_enc.as_deref() {
            Some(raw) => {
                let field: EncryptedField = serde_json::from_str(raw)?;
                Some(self.keys.decrypt_field(&field).await?)
            }
            None => None,
        };
        Ok(User {
            id: row.id,
            email,
            name: row.name,
            role: row.role,
            created_at: row.created_at,
            anonymized: row.anonymized,
            deleted: row.deleted,
        })
    }
}

fn pseudonym(user_id: i64) -> String {
    let digest = Sha256::digest(format!("labguard-user:{user_id}").as_bytes());
    format!("anon-{}", &hex::encode(digest)[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{GENESIS_HASH, seal};
    use crate::service::test_support::temp_storage;
    use crate::types::AuditQuery;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use chrono::Duration;

    async fn service() -> (tempfile::TempDir, PrivacyService, Storage) {
        let (dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage.clone());
        let keys = KeyManager::new(
            storage.clone(),
            b"privacy-test-secret",
            b"salt",
            1_000,
            Duration::days(90),
            audit.clone(),
        );
        let svc = PrivacyService::new(storage.clone(), keys, audit);
        (dir, svc, storage)
    }

    fn ana() -> NewUser {
        NewUser {
            email: "ana@lab.example".to_string(),
            name: "Ana Lima".to_string(),
            role: "technician".to_string(),
        }
    }

    #[tokio::test]
    async fn email_is_encrypted_at_rest() {
        let (_dir, svc, storage) = service().await;
        let user = svc.register_user(ana()).await.unwrap();

        let row = storage.get_user(user.id).await.unwrap().unwrap();
        let raw = row.email_enc.unwrap();
        assert!(!raw.contains("ana@lab.example"));

        let loaded = svc.get_user(user.id).await.unwrap();
        assert_eq!(loaded.email.as_deref(), Some("ana@lab.example"));
    }

    #[tokio::test]
    async fn latest_consent_wins() {
        let (_dir, svc, _) = service().await;
        let user = svc.register_user(ana()).await.unwrap();
        svc.record_consent(user.id, "research", true).await.unwrap();
        svc.record_consent(user.id, "marketing", true).await.unwrap();
        svc.record_consent(user.id, "research", false).await.unwrap();

        let states = svc.consents(user.id).await.unwrap();
        assert_eq!(states.len(), 2);
        assert!(!svc.has_consent(user.id, "research").await.unwrap());
        assert!(svc.has_consent(user.id, "marketing").await.unwrap());
    }

    #[tokio::test]
    async fn erase_scrubs_pii_but_keeps_audit_trail() {
        let (_dir, svc, storage) = service().await;
        let user = svc.register_user(ana()).await.unwrap();
        svc.record_consent(user.id, "research", true).await.unwrap();

        let receipt = svc.erase(user.id).await.unwrap();
        assert_eq!(receipt.consents_removed, 1);

        let after = svc.get_user(user.id).await.unwrap();
        assert!(after.deleted);
        assert!(after.email.is_none());
        assert_eq!(after.name, ERASED_NAME);

        let requests = storage
            .list_privacy_requests(PrivacyRequestKind::Erasure)
            .await
            .unwrap();
        assert_eq!(requests[0].status, "COMPLETED");

        let trail = svc
            .audit
            .list(&AuditQuery {
                user_id: Some(user.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!trail.is_empty());
        assert!(svc.audit.verify_integrity().await.unwrap().valid);

        let err = svc.record_consent(user.id, "research", true).await.unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn anonymize_uses_stable_pseudonym() {
        let (_dir, svc, _) = service().await;
        let user = svc.register_user(ana()).await.unwrap();
        let anon = svc.anonymize(user.id).await.unwrap();
        assert!(anon.anonymized);
        assert!(anon.email.is_none());
        assert_eq!(anon.name, pseudonym(user.id));
        assert!(anon.name.starts_with("anon-"));
        assert_eq!(anon.name.len(), "anon-".len() + 12);
    }

    #[tokio::test]
    async fn export_bundles_consents_and_activity() {
        let (_dir, svc, _) = service().await;
        let user = svc.register_user(ana()).await.unwrap();
        svc.record_consent(user.id, "research", true).await.unwrap();

        let export = svc.export(user.id).await.unwrap();
        assert_eq!(export.user.email.as_deref(), Some("ana@lab.example"));
        assert_eq!(export.consents.len(), 1);
        assert_eq!(export.audit_entries.len(), 1);
        assert_eq!(export.audit_entries[0].action, "consent.grant");
    }

    #[tokio::test]
    async fn export_is_not_truncated() {
        let (_dir, svc, storage) = service().await;
        let user = svc.register_user(ana()).await.unwrap();

        // More rows than any list page; the chain is irrelevant here.
        let mut tx = storage.pool().begin().await.unwrap();
        for i in 0..1_200 {
            let entry = seal(
                AuditEvent::new("test.access", "sample")
                    .resource(i)
                    .user(Some(user.id)),
                timestamp::now(),
                GENESIS_HASH,
            );
            Storage::insert_audit(&mut tx, &entry).await.unwrap();
        }
        tx.commit().await.unwrap();

        let export = svc.export(user.id).await.unwrap();
        assert_eq!(export.audit_entries.len(), 1_200);
    }

    #[tokio::test]
    async fn corrupt_stored_email_is_an_internal_error() {
        let (_dir, svc, storage) = service().await;
        let user = svc.register_user(ana()).await.unwrap();
        sqlx::query("UPDATE users SET email_enc = 'not json' WHERE id = ?")
            .bind(user.id)
            .execute(storage.pool())
            .await
            .unwrap();

        let err = svc.get_user(user.id).await.unwrap_err();
        assert!(matches!(err, LabGuardError::Serde(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn failed_erasure_leaves_no_trace() {
        let (_dir, svc, storage) = service().await;
        let user = svc.register_user(ana()).await.unwrap();
        svc.record_consent(user.id, "research", true).await.unwrap();
        let before = svc.audit.verify_integrity().await.unwrap().total;

        // Make the consent delete fail halfway through the erasure.
        sqlx::query(
            "CREATE TRIGGER block_consent_delete BEFORE DELETE ON consents
             BEGIN SELECT RAISE(ABORT, 'consent delete blocked'); END",
        )
        .execute(storage.pool())
        .await
        .unwrap();

        let err = svc.erase(user.id).await.unwrap_err();
        assert!(matches!(err, LabGuardError::DatabaseError(_)));

        let after = svc.get_user(user.id).await.unwrap();
        assert!(!after.deleted);
        assert_eq!(after.email.as_deref(), Some("ana@lab.example"));
        assert!(
            storage
                .list_privacy_requests(PrivacyRequestKind::Erasure)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(svc.audit.verify_integrity().await.unwrap().total, before);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (_dir, svc, _) = service().await;
        let err = svc.erase(404).await.unwrap_err();
        assert!(matches!(err, LabGuardError::NotFound { .. }));
    }
}
