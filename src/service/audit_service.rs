use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::audit::{
    ComplianceCheckResult, ComplianceReport, ComplianceSnapshot, ComplianceStatus, Framework,
    GENESIS_HASH, IntegrityReport, ReportEvidence, build_report, evaluate, seal, verify_chain,
};
use crate::db::{PrivacyRequestKind, Storage};
use crate::error::LabGuardError;
use crate::types::timestamp;
use crate::types::{AuditEntry, AuditEvent, AuditOutcome, AuditQuery, EquipmentStatus, KeyMetadata};

/// Append-only, hash-chained audit log plus the compliance checks built on it.
#[derive(Clone)]
pub struct AuditService {
    storage: Storage,
    // Serializes appends so every entry links to the one before it.
    append_lock: Arc<Mutex<()>>,
}

impl AuditService {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open a write transaction holding the append lock. Writes made on
    /// `conn()` and the entries appended to it commit together.
    pub async fn begin(&self) -> Result<AuditedTx, LabGuardError> {
        let guard = self.append_lock.clone().lock_owned().await;
        // IMMEDIATE takes the write lock now, so the chain head read later is current.
        let tx = self.storage.pool().begin_with("BEGIN IMMEDIATE").await?;
        Ok(AuditedTx { tx, _guard: guard })
    }

    /// Append one entry on its own.
    pub async fn record(&self, event: AuditEvent) -> Result<AuditEntry, LabGuardError> {
        let mut tx = self.begin().await?;
        let entry = tx.append(event).await?;
        tx.commit().await?;
        Ok(entry)
    }

    pub async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, LabGuardError> {
        self.storage.query_audit(query).await
    }

    pub async fn verify_integrity(&self) -> Result<IntegrityReport, LabGuardError> {
        let entries = self.storage.all_audit_entries().await?;
        let report = verify_chain(&entries);
        if !report.valid {
            warn!(
                tampered = ?report.tampered,
                broken_links = ?report.broken_links,
                "audit chain verification failed"
            );
        }
        Ok(report)
    }

    pub async fn compliance_check(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ComplianceCheckResult, LabGuardError> {
        let overdue_equipment = self
            .storage
            .list_equipment_due_before(now)
            .await?
            .into_iter()
            .filter(|e| e.status == EquipmentStatus::Active)
            .collect();
        let out_of_service = self
            .storage
            .list_equipment_by_status(EquipmentStatus::OutOfService)
            .await?;
        let expired_keys: Vec<KeyMetadata> = self
            .storage
            .list_expired_active_keys(now)
            .await?
            .into_iter()
            .map(KeyMetadata::from)
            .collect();
        let integrity = self.verify_integrity().await?;

        let snapshot = ComplianceSnapshot {
            overdue_equipment,
            out_of_service,
            expired_keys,
            integrity,
        };
        let result = evaluate(&snapshot, now);

        let outcome = if result.status == ComplianceStatus::Compliant {
            info!(score = result.score, "compliance check passed");
            AuditOutcome::Success
        } else {
            warn!(
                score = result.score,
                status = ?result.status,
                violations = result.violations.len(),
                "compliance check found violations"
            );
            AuditOutcome::Failure
        };

        self.record(
            AuditEvent::new("compliance.check", "compliance")
                .outcome(outcome)
                .details(json!({
                    "score": result.score,
                    "status": result.status,
                    "violations": result.violations.len(),
                })),
        )
        .await?;

        Ok(result)
    }

    pub async fn generate_report(
        &self,
        framework: Framework,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ComplianceReport, LabGuardError> {
        if from > to {
            return Err(LabGuardError::InvalidInput(
                "report period start is after its end".to_string(),
            ));
        }

        let evidence = self.collect_evidence(from, to, now).await?;
        let report = build_report(framework, from, to, now, evidence);

        info!(
            framework = %framework,
            passed = report.passed,
            total = report.total,
            "compliance report generated"
        );

        self.record(
            AuditEvent::new("compliance.report", "compliance")
                .resource(framework)
                .details(json!({
                    "from": timestamp::encode(&from),
                    "to": timestamp::encode(&to),
                    "score": report.score,
                })),
        )
        .await?;

        Ok(report)
    }

    async fn collect_evidence(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ReportEvidence, LabGuardError> {
        let audit_events = self.storage.count_audit_between(from, to, None).await?;
        let access_events = self
            .storage
            .count_audit_between(from, to, Some("privacy.export"))
            .await?
            + self
                .storage
                .count_audit_between(from, to, Some("crypto.decrypt"))
                .await?;

        let chain_valid = verify_chain(&self.storage.all_audit_entries().await?).valid;

        let active_keys = self
            .storage
            .list_keys()
            .await?
            .iter()
            .filter(|k| k.active)
            .count();
        let expired_active_keys = self.storage.list_expired_active_keys(now).await?.len();

        let equipment = self.storage.list_equipment().await?;
        let active_equipment = equipment
            .iter()
            .filter(|e| e.status == EquipmentStatus::Active)
            .count();
        let out_of_service_equipment = equipment
            .iter()
            .filter(|e| e.status == EquipmentStatus::OutOfService)
            .count();
        let overdue_equipment = equipment
            .iter()
            .filter(|e| e.status == EquipmentStatus::Active)
            .filter(|e| e.next_due_at.is_some_and(|due| due < now))
            .count();

        let consent_records = self.storage.count_consents().await?;
        let erasures = self
            .storage
            .list_privacy_requests(PrivacyRequestKind::Erasure)
            .await?;
        let erasure_requests_completed = erasures
            .iter()
            .filter(|r| r.status == "COMPLETED")
            .count();

        Ok(ReportEvidence {
            audit_events,
            access_events,
            chain_valid,
            active_keys,
            expired_active_keys,
            active_equipment,
            overdue_equipment,
            out_of_service_equipment,
            consent_records,
            erasure_requests: erasures.len(),
            erasure_requests_completed,
        })
    }
}

/// A mutation and its audit entries as one unit of work. Dropping it
/// without `commit` rolls everything back.
pub struct AuditedTx {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl AuditedTx {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn append(&mut self, event: AuditEvent) -> Result<AuditEntry, LabGuardError> {
        let prev = Storage::last_audit_hash(&mut self.tx)
            .await?
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let mut entry = seal(event, timestamp::now(), &prev);
        entry.id = Storage::insert_audit(&mut self.tx, &entry).await?;

        debug!(
            id = entry.id,
            action = %entry.action,
            resource_type = %entry.resource_type,
            "audit entry appended"
        );
        Ok(entry)
    }

    pub async fn commit(self) -> Result<(), LabGuardError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::temp_storage;
    use crate::types::{EquipmentKind, NewEquipment};
    use chrono::Duration;

    #[tokio::test]
    async fn appended_entries_form_a_valid_chain() {
        let (_dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage);

        let first = audit
            .record(AuditEvent::new("equipment.register", "equipment").resource(1))
            .await
            .unwrap();
        let second = audit
            .record(AuditEvent::new("equipment.retire", "equipment").resource(1))
            .await
            .unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.integrity_hash);

        let report = audit.verify_integrity().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.total, 2);
    }

    #[tokio::test]
    async fn concurrent_appends_stay_linear() {
        let (_dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage);

        let mut tasks = Vec::new();
        for i in 0..10 {
            let audit = audit.clone();
            tasks.push(tokio::spawn(async move {
                audit
                    .record(AuditEvent::new("test.event", "test").resource(i))
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let report = audit.verify_integrity().await.unwrap();
        assert!(report.valid, "{report:?}");
        assert_eq!(report.total, 10);
    }

    #[tokio::test]
    async fn direct_row_edit_is_detected() {
        let (_dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage.clone());
        for i in 0..3 {
            audit
                .record(AuditEvent::new("test.event", "test").resource(i))
                .await
                .unwrap();
        }

        sqlx::query("UPDATE audit_logs SET action = 'test.forged' WHERE id = 2")
            .execute(storage.pool())
            .await
            .unwrap();

        let report = audit.verify_integrity().await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.tampered, vec![2]);
    }

    #[tokio::test]
    async fn overdue_equipment_lowers_compliance_score() {
        let (_dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage.clone());
        let now = timestamp::now();

        let new = NewEquipment {
            name: "Fridge".to_string(),
            kind: EquipmentKind::Refrigerator,
            serial_number: "RF-1".to_string(),
            location: None,
            calibration_interval_days: 365,
            next_due_at: None,
        };
        let mut conn = storage.pool().acquire().await.unwrap();
        Storage::insert_equipment(&mut conn, &new, now - Duration::days(2))
            .await
            .unwrap();
        drop(conn);

        let result = audit.compliance_check(now).await.unwrap();
        assert_eq!(result.score, 85);
        assert_eq!(result.status, ComplianceStatus::NeedsAttention);

        let logged = audit
            .list(&AuditQuery {
                action: Some("compliance.check".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].outcome, AuditOutcome::Failure);
    }

    #[tokio::test]
    async fn inverted_report_period_is_rejected() {
        let (_dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage);
        let now = timestamp::now();
        let err = audit
            .generate_report(Framework::Soc2, now, now - Duration::days(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidInput(_)));
    }
}
