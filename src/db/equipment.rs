use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};

use super::sqlite::{Storage, fmt_opt_ts, parse_enum, parse_opt_ts, parse_ts};
use crate::calibration::CalibrationResult;
use crate::error::LabGuardError;
use crate::types::timestamp;
use crate::types::{
    CalibrationRecord, CalibrationStatus, Equipment, EquipmentStatus, NewEquipment,
};

const EQUIPMENT_COLUMNS: &str = "id, name, kind, serial_number, location, calibration_interval_days, \
     last_calibrated_at, next_due_at, status";

const RECORD_COLUMNS: &str = "id, equipment_id, scheduled_for, performed_at, performed_by, status, \
     result, compliance_score, notes";

// Writes take the caller's connection so they can share a transaction
// with the audit entry that records them.
impl Storage {
    pub async fn insert_equipment(
        conn: &mut SqliteConnection,
        new: &NewEquipment,
        next_due_at: DateTime<Utc>,
    ) -> Result<i64, LabGuardError> {
        let res = sqlx::query(
            r#"
            INSERT INTO equipment (
                name, kind, serial_number, location, calibration_interval_days,
                next_due_at, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(new.kind.as_str())
        .bind(&new.serial_number)
        .bind(&new.location)
        .bind(new.calibration_interval_days)
        .bind(timestamp::encode(&next_due_at))
        .bind(EquipmentStatus::Active.as_str())
        .execute(conn)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn get_equipment(&self, id: i64) -> Result<Option<Equipment>, LabGuardError> {
        let row = sqlx::query(&format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(row_to_equipment).transpose()
    }

    pub async fn list_equipment(&self) -> Result<Vec<Equipment>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_equipment).collect()
    }

    /// Non-retired equipment whose next calibration is due before `now`.
    pub async fn list_equipment_due_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Equipment>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment
             WHERE status != 'RETIRED' AND next_due_at IS NOT NULL AND next_due_at < ?
             ORDER BY next_due_at"
        ))
        .bind(timestamp::encode(&now))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_equipment).collect()
    }

    pub async fn list_equipment_by_status(
        &self,
        status: EquipmentStatus,
    ) -> Result<Vec<Equipment>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE status = ? ORDER BY id"
        ))
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_equipment).collect()
    }

    /// Move equipment from `from` to `to`; false if it was no longer in `from`.
    pub async fn set_equipment_status(
        conn: &mut SqliteConnection,
        id: i64,
        from: EquipmentStatus,
        to: EquipmentStatus,
    ) -> Result<bool, LabGuardError> {
        let res = sqlx::query("UPDATE equipment SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(conn)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn insert_record(
        conn: &mut SqliteConnection,
        equipment_id: i64,
        scheduled_for: DateTime<Utc>,
    ) -> Result<i64, LabGuardError> {
        let res = sqlx::query(
            "INSERT INTO calibration_records (equipment_id, scheduled_for, status) VALUES (?, ?, ?)",
        )
        .bind(equipment_id)
        .bind(timestamp::encode(&scheduled_for))
        .bind(CalibrationStatus::Pending.as_str())
        .execute(conn)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<CalibrationRecord>, LabGuardError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM calibration_records WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(row_to_record).transpose()
    }

    pub async fn list_records_for_equipment(
        &self,
        equipment_id: i64,
    ) -> Result<Vec<CalibrationRecord>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM calibration_records
             WHERE equipment_id = ? ORDER BY scheduled_for, id"
        ))
        .bind(equipment_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn list_records_performed_by(
        &self,
        user_id: i64,
    ) -> Result<Vec<CalibrationRecord>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM calibration_records
             WHERE performed_by = ? ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn list_pending_records_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalibrationRecord>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM calibration_records
             WHERE status = 'PENDING' AND scheduled_for < ? ORDER BY scheduled_for"
        ))
        .bind(timestamp::encode(&now))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Compare-and-set on the record status; false if it was no longer `from`.
    pub async fn set_record_status(
        conn: &mut SqliteConnection,
        id: i64,
        from: CalibrationStatus,
        to: CalibrationStatus,
    ) -> Result<bool, LabGuardError> {
        let res = sqlx::query("UPDATE calibration_records SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(conn)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Store the outcome of a calibration and the equipment bookkeeping it
    /// implies. Nothing is written, and false returned, unless the record
    /// was still in `from`.
    pub async fn finish_record(
        conn: &mut SqliteConnection,
        record: &CalibrationRecord,
        from: CalibrationStatus,
        equipment_status: EquipmentStatus,
        last_calibrated_at: Option<&DateTime<Utc>>,
        next_due_at: Option<&DateTime<Utc>>,
    ) -> Result<bool, LabGuardError> {
        let result_json = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let res = sqlx::query(
            r#"UPDATE calibration_records SET
                performed_at = ?,
                performed_by = ?,
                status = ?,
                result = ?,
                compliance_score = ?,
                notes = ?
              WHERE id = ? AND status = ?"#,
        )
        .bind(fmt_opt_ts(record.performed_at.as_ref()))
        .bind(record.performed_by)
        .bind(record.status.as_str())
        .bind(result_json)
        .bind(record.compliance_score.map(i64::from))
        .bind(&record.notes)
        .bind(record.id)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;
        if res.rows_affected() != 1 {
            return Ok(false);
        }

        match (last_calibrated_at, next_due_at) {
            (Some(last), Some(next)) => {
                sqlx::query(
                    "UPDATE equipment SET status = ?, last_calibrated_at = ?, next_due_at = ? WHERE id = ?",
                )
                .bind(equipment_status.as_str())
                .bind(timestamp::encode(last))
                .bind(timestamp::encode(next))
                .bind(record.equipment_id)
                .execute(&mut *conn)
                .await?;
            }
            _ => {
                sqlx::query("UPDATE equipment SET status = ? WHERE id = ?")
                    .bind(equipment_status.as_str())
                    .bind(record.equipment_id)
                    .execute(&mut *conn)
                    .await?;
            }
        }

        Ok(true)
    }
}

fn row_to_equipment(row: SqliteRow) -> Result<Equipment, LabGuardError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let last: Option<String> = row.try_get("last_calibrated_at")?;
    let next: Option<String> = row.try_get("next_due_at")?;

    Ok(Equipment {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: parse_enum(&kind)?,
        serial_number: row.try_get("serial_number")?,
        location: row.try_get("location")?,
        calibration_interval_days: row.try_get("calibration_interval_days")?,
        last_calibrated_at: parse_opt_ts(last)?,
        next_due_at: parse_opt_ts(next)?,
        status: parse_enum(&status)?,
    })
}

fn row_to_record(row: SqliteRow) -> Result<CalibrationRecord, LabGuardError> {
    let scheduled_for: String = row.try_get("scheduled_for")?;
    let performed_at: Option<String> = row.try_get("performed_at")?;
    let status: String = row.try_get("status")?;
    let result_json: Option<String> = row.try_get("result")?;
    let score: Option<i64> = row.try_get("compliance_score")?;

    let result: Option<CalibrationResult> = match result_json {
        Some(s) => Some(serde_json::from_str(&s).map_err(|e| sqlx::Error::Decode(Box::new(e)))?),
        None => None,
    };

    Ok(CalibrationRecord {
        id: row.try_get("id")?,
        equipment_id: row.try_get("equipment_id")?,
        scheduled_for: parse_ts(&scheduled_for)?,
        performed_at: parse_opt_ts(performed_at)?,
        performed_by: row.try_get("performed_by")?,
        status: parse_enum(&status)?,
        result,
        compliance_score: score.map(|s| s.clamp(0, 100) as u32),
        notes: row.try_get("notes")?,
    })
}
