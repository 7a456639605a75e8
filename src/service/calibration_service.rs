use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::calibration::{CalibrationProtocol, CalibrationValidator};
use crate::db::Storage;
use crate::error::LabGuardError;
use crate::service::AuditService;
use crate::types::timestamp;
use crate::types::{
    AuditEvent, AuditOutcome, CalibrationRecord, CalibrationStatus, Equipment, EquipmentStatus,
    NewEquipment,
};

/// Upper bound on a calibration interval: one hundred years.
pub const MAX_INTERVAL_DAYS: i64 = 36_500;

/// Equipment still needing calibration at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct OverdueReport {
    pub checked_at: DateTime<Utc>,
    pub equipment: Vec<Equipment>,
    pub pending_records: Vec<CalibrationRecord>,
}

/// Equipment registry plus the calibration record lifecycle.
#[derive(Clone)]
pub struct CalibrationService {
    storage: Storage,
    validator: CalibrationValidator,
    audit: AuditService,
}

impl CalibrationService {
    pub fn new(storage: Storage, validator: CalibrationValidator, audit: AuditService) -> Self {
        Self {
            storage,
            validator,
            audit,
        }
    }

    pub fn validator(&self) -> &CalibrationValidator {
        &self.validator
    }

    pub async fn register_equipment(&self, new: NewEquipment) -> Result<Equipment, LabGuardError> {
        if new.name.trim().is_empty() || new.serial_number.trim().is_empty() {
            return Err(LabGuardError::InvalidInput(
                "name and serial_number are required".to_string(),
            ));
        }
        if !(1..=MAX_INTERVAL_DAYS).contains(&new.calibration_interval_days) {
            return Err(LabGuardError::InvalidInput(format!(
                "calibration_interval_days must be between 1 and {MAX_INTERVAL_DAYS}"
            )));
        }

        let next_due = new.next_due_at.unwrap_or_else(timestamp::now);
        let mut tx = self.audit.begin().await?;
        let id = match Storage::insert_equipment(tx.conn(), &new, next_due).await {
            Ok(id) => id,
            Err(LabGuardError::DatabaseError(sqlx::Error::Database(db)))
                if db.is_unique_violation() =>
            {
                return Err(LabGuardError::InvalidInput(format!(
                    "serial number {} is already registered",
                    new.serial_number
                )));
            }
            Err(e) => return Err(e),
        };
        tx.append(
            AuditEvent::new("equipment.register", "equipment")
                .resource(id)
                .details(json!({
                    "serial_number": new.serial_number,
                    "kind": new.kind,
                    "interval_days": new.calibration_interval_days,
                })),
        )
        .await?;
        tx.commit().await?;

        info!(id, serial = %new.serial_number, kind = new.kind.as_str(), "equipment registered");
        self.get_equipment(id).await
    }

    pub async fn get_equipment(&self, id: i64) -> Result<Equipment, LabGuardError> {
        self.storage
            .get_equipment(id)
            .await?
            .ok_or_else(|| LabGuardError::not_found("equipment", id))
    }

    pub async fn list_equipment(&self) -> Result<Vec<Equipment>, LabGuardError> {
        self.storage.list_equipment().await
    }

    /// Soft delete. History and records are kept.
    pub async fn retire_equipment(&self, id: i64) -> Result<Equipment, LabGuardError> {
        loop {
            let mut equipment = self.get_equipment(id).await?;
            if equipment.status == EquipmentStatus::Retired {
                return Ok(equipment);
            }
            let mut tx = self.audit.begin().await?;
            let changed = Storage::set_equipment_status(
                tx.conn(),
                id,
                equipment.status,
                EquipmentStatus::Retired,
            )
            .await?;
            if !changed {
                // A calibration finished in between; re-read and retry.
                drop(tx);
                continue;
            }
            tx.append(
                AuditEvent::new("equipment.retire", "equipment")
                    .resource(id)
                    .details(json!({ "previous_status": equipment.status })),
            )
            .await?;
            tx.commit().await?;
            equipment.status = EquipmentStatus::Retired;
            return Ok(equipment);
        }
    }

    /// Open a PENDING record; defaults to the equipment's due date, else now.
    pub async fn schedule(
        &self,
        equipment_id: i64,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<CalibrationRecord, LabGuardError> {
        let equipment = self.get_equipment(equipment_id).await?;
        if equipment.status == EquipmentStatus::Retired {
            return Err(LabGuardError::InvalidInput(format!(
                "equipment {equipment_id} is retired"
            )));
        }

        let when = scheduled_for
            .or(equipment.next_due_at)
            .unwrap_or_else(timestamp::now);
        let mut tx = self.audit.begin().await?;
        let id = Storage::insert_record(tx.conn(), equipment_id, when).await?;
        tx.append(
            AuditEvent::new("calibration.schedule", "calibration_record")
                .resource(id)
                .details(json!({
                    "equipment_id": equipment_id,
                    "scheduled_for": timestamp::encode(&when),
                })),
        )
        .await?;
        tx.commit().await?;

        self.get_record(id).await
    }

    pub async fn get_record(&self, id: i64) -> Result<CalibrationRecord, LabGuardError> {
        self.storage
            .get_record(id)
            .await?
            .ok_or_else(|| LabGuardError::not_found("calibration record", id))
    }

    pub async fn list_records(
        &self,
        equipment_id: i64,
    ) -> Result<Vec<CalibrationRecord>, LabGuardError> {
        self.get_equipment(equipment_id).await?;
        self.storage.list_records_for_equipment(equipment_id).await
    }

    pub async fn start(&self, record_id: i64) -> Result<CalibrationRecord, LabGuardError> {
        self.transition(record_id, CalibrationStatus::InProgress, "calibration.start")
            .await
    }

    pub async fn cancel(&self, record_id: i64) -> Result<CalibrationRecord, LabGuardError> {
        self.transition(record_id, CalibrationStatus::Cancelled, "calibration.cancel")
            .await
    }

    /// Validate measurements and close the record as COMPLETED or FAILED.
    pub async fn complete(
        &self,
        record_id: i64,
        protocol: &CalibrationProtocol,
        performed_by: Option<i64>,
        notes: Option<String>,
    ) -> Result<CalibrationRecord, LabGuardError> {
        let mut record = self.get_record(record_id).await?;
        if record.status.is_terminal() {
            return Err(LabGuardError::InvalidTransition {
                from: record.status.to_string(),
                to: CalibrationStatus::Completed.to_string(),
            });
        }

        let equipment = self.get_equipment(record.equipment_id).await?;
        if equipment.status == EquipmentStatus::Retired {
            return Err(LabGuardError::InvalidInput(format!(
                "equipment {} is retired",
                equipment.id
            )));
        }
        if !equipment.kind.accepts(protocol.kind()) {
            return Err(LabGuardError::InvalidInput(format!(
                "{} protocol does not apply to {} equipment",
                protocol.kind(),
                equipment.kind.as_str()
            )));
        }

        let result = self.validator.validate(protocol)?;
        let now = timestamp::now();
        let passed = result.passed();
        let next_due = if passed {
            let due = Duration::try_days(equipment.calibration_interval_days)
                .and_then(|interval| now.checked_add_signed(interval))
                .ok_or_else(|| {
                    LabGuardError::InvalidInput(format!(
                        "calibration interval of {} days is out of range",
                        equipment.calibration_interval_days
                    ))
                })?;
            Some(due)
        } else {
            None
        };
        let from = record.status;

        record.status = if passed {
            CalibrationStatus::Completed
        } else {
            CalibrationStatus::Failed
        };
        record.performed_at = Some(now);
        record.performed_by = performed_by;
        record.compliance_score = Some(result.compliance_score);
        record.notes = notes;
        record.result = Some(result);

        let equipment_status = if passed {
            EquipmentStatus::Active
        } else {
            EquipmentStatus::OutOfService
        };

        let mut tx = self.audit.begin().await?;
        let written = Storage::finish_record(
            tx.conn(),
            &record,
            from,
            equipment_status,
            next_due.as_ref().map(|_| &now),
            next_due.as_ref(),
        )
        .await?;
        if !written {
            drop(tx);
            return Err(self.lost_race(record_id, CalibrationStatus::Completed).await);
        }

        let violations = record.result.as_ref().map(|r| r.violations).unwrap_or(0);
        tx.append(
            AuditEvent::new("calibration.complete", "calibration_record")
                .resource(record_id)
                .user(performed_by)
                .outcome(if passed {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Failure
                })
                .details(json!({
                    "equipment_id": equipment.id,
                    "status": record.status,
                    "compliance_score": record.compliance_score,
                    "violations": violations,
                })),
        )
        .await?;
        tx.commit().await?;

        match next_due {
            Some(next_due) => info!(
                record_id,
                equipment_id = equipment.id,
                next_due = %timestamp::encode(&next_due),
                "calibration passed"
            ),
            None => warn!(
                record_id,
                equipment_id = equipment.id,
                score = record.compliance_score,
                "calibration failed, equipment taken out of service"
            ),
        }

        Ok(record)
    }

    /// Active equipment past its due date and PENDING records scheduled before `now`.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Result<OverdueReport, LabGuardError> {
        let equipment = self
            .storage
            .list_equipment_due_before(now)
            .await?
            .into_iter()
            .filter(|e| e.status == EquipmentStatus::Active)
            .collect();
        let pending_records = self.storage.list_pending_records_before(now).await?;
        Ok(OverdueReport {
            checked_at: now,
            equipment,
            pending_records,
        })
    }

    async fn transition(
        &self,
        record_id: i64,
        to: CalibrationStatus,
        action: &str,
    ) -> Result<CalibrationRecord, LabGuardError> {
        let mut record = self.get_record(record_id).await?;
        if !record.status.can_transition_to(to) {
            return Err(LabGuardError::InvalidTransition {
                from: record.status.to_string(),
                to: to.to_string(),
            });
        }
        let from = record.status;

        let mut tx = self.audit.begin().await?;
        if !Storage::set_record_status(tx.conn(), record_id, from, to).await? {
            drop(tx);
            return Err(self.lost_race(record_id, to).await);
        }
        tx.append(
            AuditEvent::new(action, "calibration_record")
                .resource(record_id)
                .details(json!({ "from": from, "to": to })),
        )
        .await?;
        tx.commit().await?;

        record.status = to;
        Ok(record)
    }

    /// Error for a write that found the record already moved by another request.
    async fn lost_race(&self, record_id: i64, to: CalibrationStatus) -> LabGuardError {
        match self.get_record(record_id).await {
            Ok(current) => LabGuardError::InvalidTransition {
                from: current.status.to_string(),
                to: to.to_string(),
            },
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{AcceptanceCriteria, TargetMeasurements};
    use crate::service::test_support::temp_storage;
    use crate::types::{AuditQuery, EquipmentKind};

    async fn service() -> (tempfile::TempDir, CalibrationService, AuditService) {
        let (dir, storage) = temp_storage().await;
        let audit = AuditService::new(storage.clone());
        let svc = CalibrationService::new(
            storage,
            CalibrationValidator::new(AcceptanceCriteria::default()),
            audit.clone(),
        );
        (dir, svc, audit)
    }

    fn incubator(serial: &str) -> NewEquipment {
        NewEquipment {
            name: "CO2 incubator".to_string(),
            kind: EquipmentKind::Incubator,
            serial_number: serial.to_string(),
            location: Some("Lab 2".to_string()),
            calibration_interval_days: 180,
            next_due_at: None,
        }
    }

    fn thermal(readings: [f64; 3]) -> CalibrationProtocol {
        CalibrationProtocol::Thermal {
            points: vec![TargetMeasurements {
                target: 37.0,
                readings: readings.to_vec(),
            }],
        }
    }

    #[tokio::test]
    async fn passing_calibration_moves_due_date() {
        let (_dir, svc, _) = service().await;
        let eq = svc.register_equipment(incubator("INC-1")).await.unwrap();
        let rec = svc.schedule(eq.id, None).await.unwrap();
        assert_eq!(rec.status, CalibrationStatus::Pending);

        svc.start(rec.id).await.unwrap();
        let done = svc
            .complete(rec.id, &thermal([37.1, 37.0, 36.9]), Some(7), None)
            .await
            .unwrap();
        assert_eq!(done.status, CalibrationStatus::Completed);
        assert_eq!(done.compliance_score, Some(100));

        let eq = svc.get_equipment(eq.id).await.unwrap();
        let last = eq.last_calibrated_at.unwrap();
        assert_eq!(eq.next_due_at.unwrap() - last, Duration::days(180));
        assert_eq!(eq.status, EquipmentStatus::Active);
    }

    #[tokio::test]
    async fn failing_calibration_takes_equipment_out_of_service() {
        let (_dir, svc, audit) = service().await;
        let eq = svc.register_equipment(incubator("INC-2")).await.unwrap();
        let rec = svc.schedule(eq.id, None).await.unwrap();

        let done = svc
            .complete(rec.id, &thermal([38.0, 38.1, 37.9]), None, None)
            .await
            .unwrap();
        assert_eq!(done.status, CalibrationStatus::Failed);
        assert_eq!(done.compliance_score, Some(75));

        let eq = svc.get_equipment(eq.id).await.unwrap();
        assert_eq!(eq.status, EquipmentStatus::OutOfService);
        assert!(eq.last_calibrated_at.is_none());

        let entries = audit
            .list(&AuditQuery {
                action: Some("calibration.complete".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(entries[0].outcome, AuditOutcome::Failure);
    }

    #[tokio::test]
    async fn terminal_records_reject_transitions() {
        let (_dir, svc, _) = service().await;
        let eq = svc.register_equipment(incubator("INC-3")).await.unwrap();
        let rec = svc.schedule(eq.id, None).await.unwrap();
        svc.cancel(rec.id).await.unwrap();

        let err = svc.start(rec.id).await.unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidTransition { .. }));
        let err = svc
            .complete(rec.id, &thermal([37.0, 37.0, 37.0]), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn pipette_protocol_is_rejected_for_incubator() {
        let (_dir, svc, _) = service().await;
        let eq = svc.register_equipment(incubator("INC-4")).await.unwrap();
        let rec = svc.schedule(eq.id, None).await.unwrap();
        let protocol = CalibrationProtocol::Pipette {
            points: vec![TargetMeasurements {
                target: 100.0,
                readings: vec![100.0, 100.1, 99.9],
            }],
            gravimetric: None,
        };
        let err = svc.complete(rec.id, &protocol, None, None).await.unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn retired_equipment_cannot_be_scheduled() {
        let (_dir, svc, _) = service().await;
        let eq = svc.register_equipment(incubator("INC-5")).await.unwrap();
        let retired = svc.retire_equipment(eq.id).await.unwrap();
        assert_eq!(retired.status, EquipmentStatus::Retired);
        let err = svc.schedule(eq.id, None).await.unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn duplicate_serial_is_invalid_input() {
        let (_dir, svc, _) = service().await;
        svc.register_equipment(incubator("INC-6")).await.unwrap();
        let err = svc.register_equipment(incubator("INC-6")).await.unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn concurrent_cancel_and_complete_pick_one_winner() {
        let (_dir, svc, audit) = service().await;
        let eq = svc.register_equipment(incubator("INC-9")).await.unwrap();
        let protocol = thermal([37.0, 37.1, 36.9]);

        for _ in 0..20 {
            let rec = svc.schedule(eq.id, None).await.unwrap();
            let (cancelled, completed) =
                tokio::join!(svc.cancel(rec.id), svc.complete(rec.id, &protocol, None, None));
            assert!(
                cancelled.is_ok() != completed.is_ok(),
                "exactly one of cancel/complete must win for record {}",
                rec.id
            );

            let loser = match (&cancelled, &completed) {
                (Err(e), _) | (_, Err(e)) => e,
                _ => unreachable!(),
            };
            assert!(matches!(loser, LabGuardError::InvalidTransition { .. }));

            let stored = svc.get_record(rec.id).await.unwrap();
            let expected = if cancelled.is_ok() {
                CalibrationStatus::Cancelled
            } else {
                CalibrationStatus::Completed
            };
            assert_eq!(stored.status, expected);
        }

        let closing = audit
            .list(&AuditQuery {
                resource_type: Some("calibration_record".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.action == "calibration.cancel" || e.action == "calibration.complete")
            .count();
        assert_eq!(closing, 20);
        assert!(audit.verify_integrity().await.unwrap().valid);
    }

    #[tokio::test]
    async fn oversized_interval_is_rejected_at_registration() {
        let (_dir, svc, _) = service().await;
        let mut huge = incubator("INC-10");
        huge.calibration_interval_days = 1_000_000_000;
        let err = svc.register_equipment(huge).await.unwrap_err();
        assert!(matches!(err, LabGuardError::InvalidInput(_)));

        let mut longest = incubator("INC-11");
        longest.calibration_interval_days = MAX_INTERVAL_DAYS;
        let eq = svc.register_equipment(longest).await.unwrap();
        let rec = svc.schedule(eq.id, None).await.unwrap();
        let done = svc
            .complete(rec.id, &thermal([37.0, 37.0, 37.0]), None, None)
            .await
            .unwrap();
        assert_eq!(done.status, CalibrationStatus::Completed);
        let eq = svc.get_equipment(eq.id).await.unwrap();
        assert_eq!(
            eq.next_due_at.unwrap() - eq.last_calibrated_at.unwrap(),
            Duration::days(MAX_INTERVAL_DAYS)
        );
    }

    #[tokio::test]
    async fn overdue_lists_past_due_equipment_and_pending_records() {
        let (_dir, svc, _) = service().await;
        let now = timestamp::now();
        let mut late = incubator("INC-7");
        late.next_due_at = Some(now - Duration::days(5));
        let late = svc.register_equipment(late).await.unwrap();
        let mut fine = incubator("INC-8");
        fine.next_due_at = Some(now + Duration::days(5));
        svc.register_equipment(fine).await.unwrap();
        svc.schedule(late.id, None).await.unwrap();

        let report = svc.overdue(now).await.unwrap();
        assert_eq!(report.equipment.len(), 1);
        assert_eq!(report.equipment[0].id, late.id);
        assert_eq!(report.pending_records.len(), 1);
    }
}
