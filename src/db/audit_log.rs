use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::sqlite::{Storage, parse_enum, parse_ts};
use crate::error::LabGuardError;
use crate::types::timestamp;
use crate::types::{AuditEntry, AuditQuery};

const AUDIT_COLUMNS: &str = "id, timestamp, user_id, action, resource_type, resource_id, outcome, \
     details, prev_hash, integrity_hash";

const DEFAULT_LIMIT: i64 = 500;

impl Storage {
    /// Hash of the most recent entry, if any.
    pub async fn last_audit_hash(
        conn: &mut SqliteConnection,
    ) -> Result<Option<String>, LabGuardError> {
        let rec: Option<(String,)> =
            sqlx::query_as("SELECT integrity_hash FROM audit_logs ORDER BY id DESC LIMIT 1")
                .fetch_optional(conn)
                .await?;
        Ok(rec.map(|r| r.0))
    }

    /// Append an entry; `entry.id` is ignored and the assigned id returned.
    pub async fn insert_audit(
        conn: &mut SqliteConnection,
        entry: &AuditEntry,
    ) -> Result<i64, LabGuardError> {
        let details = serde_json::to_string(&entry.details)?;
        let res = sqlx::query(
            r#"
            INSERT INTO audit_logs (
                timestamp, user_id, action, resource_type, resource_id,
                outcome, details, prev_hash, integrity_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(timestamp::encode(&entry.timestamp))
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(entry.outcome.as_str())
        .bind(details)
        .bind(&entry.prev_hash)
        .bind(&entry.integrity_hash)
        .execute(conn)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn query_audit(&self, q: &AuditQuery) -> Result<Vec<AuditEntry>, LabGuardError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE 1 = 1"));
        if let Some(from) = q.from.as_ref() {
            qb.push(" AND timestamp >= ").push_bind(timestamp::encode(from));
        }
        if let Some(to) = q.to.as_ref() {
            qb.push(" AND timestamp <= ").push_bind(timestamp::encode(to));
        }
        if let Some(user_id) = q.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(rt) = q.resource_type.as_ref() {
            qb.push(" AND resource_type = ").push_bind(rt.clone());
        }
        if let Some(action) = q.action.as_ref() {
            qb.push(" AND action = ").push_bind(action.clone());
        }
        qb.push(" ORDER BY id LIMIT ")
            .push_bind(q.limit.unwrap_or(DEFAULT_LIMIT).max(1));

        let rows = qb.build().fetch_all(self.pool()).await?;
        rows.into_iter().map(row_to_audit).collect()
    }

    /// Whole log in chain order.
    pub async fn all_audit_entries(&self) -> Result<Vec<AuditEntry>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_audit).collect()
    }

    /// Every entry attributed to `user_id`, in chain order.
    pub async fn audit_entries_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<AuditEntry>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE user_id = ? ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_audit).collect()
    }

    pub async fn count_audit_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        action_prefix: Option<&str>,
    ) -> Result<i64, LabGuardError> {
        let pattern = action_prefix.map(|p| format!("{p}%"));
        let rec: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM audit_logs
               WHERE timestamp >= ? AND timestamp <= ?
                 AND (? IS NULL OR action LIKE ?)"#,
        )
        .bind(timestamp::encode(&from))
        .bind(timestamp::encode(&to))
        .bind(pattern.clone())
        .bind(pattern)
        .fetch_one(self.pool())
        .await?;
        Ok(rec.0)
    }
}

fn row_to_audit(row: SqliteRow) -> Result<AuditEntry, LabGuardError> {
    let ts: String = row.try_get("timestamp")?;
    let outcome: String = row.try_get("outcome")?;
    let details: String = row.try_get("details")?;
    let details: Value =
        serde_json::from_str(&details).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        timestamp: parse_ts(&ts)?,
        user_id: row.try_get("user_id")?,
        action: row.try_get("action")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        outcome: parse_enum(&outcome)?,
        details,
        prev_hash: row.try_get("prev_hash")?,
        integrity_hash: row.try_get("integrity_hash")?,
    })
}
