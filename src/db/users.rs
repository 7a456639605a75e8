use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};

use super::models::{DbPrivacyRequest, DbUser, PrivacyRequestKind};
use super::sqlite::{Storage, parse_opt_ts, parse_ts};
use crate::error::LabGuardError;
use crate::types::ConsentRecord;
use crate::types::timestamp;

const USER_COLUMNS: &str = "id, email_enc, name, role, created_at, anonymized, deleted";

impl Storage {
    pub async fn insert_user(
        conn: &mut SqliteConnection,
        email_enc: Option<&str>,
        name: &str,
        role: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64, LabGuardError> {
        let res = sqlx::query(
            "INSERT INTO users (email_enc, name, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(email_enc)
        .bind(name)
        .bind(role)
        .bind(timestamp::encode(&created_at))
        .execute(conn)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<DbUser>, LabGuardError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(row_to_user).transpose()
    }

    /// Overwrite the personal fields of a user row.
    pub async fn update_user_pii(
        conn: &mut SqliteConnection,
        id: i64,
        email_enc: Option<&str>,
        name: &str,
        anonymized: bool,
        deleted: bool,
    ) -> Result<(), LabGuardError> {
        sqlx::query(
            "UPDATE users SET email_enc = ?, name = ?, anonymized = ?, deleted = ? WHERE id = ?",
        )
        .bind(email_enc)
        .bind(name)
        .bind(anonymized as i64)
        .bind(deleted as i64)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_consent(
        conn: &mut SqliteConnection,
        user_id: i64,
        purpose: &str,
        granted: bool,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64, LabGuardError> {
        let res = sqlx::query(
            "INSERT INTO consents (user_id, purpose, granted, recorded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(purpose)
        .bind(granted as i64)
        .bind(timestamp::encode(&recorded_at))
        .execute(conn)
        .await?;
        Ok(res.last_insert_rowid())
    }

    /// Full consent history, oldest first.
    pub async fn list_consents(&self, user_id: i64) -> Result<Vec<ConsentRecord>, LabGuardError> {
        let rows = sqlx::query(
            "SELECT id, user_id, purpose, granted, recorded_at FROM consents
             WHERE user_id = ? ORDER BY recorded_at, id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_consent).collect()
    }

    pub async fn delete_consents(conn: &mut SqliteConnection, user_id: i64) -> Result<u64, LabGuardError> {
        let res = sqlx::query("DELETE FROM consents WHERE user_id = ?")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn count_consents(&self) -> Result<i64, LabGuardError> {
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM consents")
            .fetch_one(self.pool())
            .await?;
        Ok(rec.0)
    }

    pub async fn insert_privacy_request(
        conn: &mut SqliteConnection,
        user_id: i64,
        kind: PrivacyRequestKind,
        requested_at: DateTime<Utc>,
    ) -> Result<i64, LabGuardError> {
        let res = sqlx::query(
            "INSERT INTO privacy_requests (user_id, kind, status, requested_at) VALUES (?, ?, 'PENDING', ?)",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(timestamp::encode(&requested_at))
        .execute(conn)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn complete_privacy_request(
        conn: &mut SqliteConnection,
        id: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<(), LabGuardError> {
        sqlx::query("UPDATE privacy_requests SET status = 'COMPLETED', completed_at = ? WHERE id = ?")
            .bind(timestamp::encode(&completed_at))
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn list_privacy_requests(
        &self,
        kind: PrivacyRequestKind,
    ) -> Result<Vec<DbPrivacyRequest>, LabGuardError> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, status, requested_at, completed_at FROM privacy_requests
             WHERE kind = ? ORDER BY id",
        )
        .bind(kind.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|row| -> Result<DbPrivacyRequest, LabGuardError> {
                let requested_at: String = row.try_get("requested_at")?;
                let completed_at: Option<String> = row.try_get("completed_at")?;
                Ok(DbPrivacyRequest {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    kind: row.try_get("kind")?,
                    status: row.try_get("status")?,
                    requested_at: parse_ts(&requested_at)?,
                    completed_at: parse_opt_ts(completed_at)?,
                })
            })
            .collect()
    }
}

fn row_to_user(row: SqliteRow) -> Result<DbUser, LabGuardError> {
    let created_at: String = row.try_get("created_at")?;
    let anonymized: i64 = row.try_get("anonymized")?;
    let deleted: i64 = row.try_get("deleted")?;
    Ok(DbUser {
        id: row.try_get("id")?,
        email_enc: row.try_get("email_enc")?,
        name: row.try_get("name")?,
        role: row.try_get("role")?,
        created_at: parse_ts(&created_at)?,
        anonymized: anonymized != 0,
        deleted: deleted != 0,
    })
}

fn row_to_consent(row: SqliteRow) -> Result<ConsentRecord, LabGuardError> {
    let granted: i64 = row.try_get("granted")?;
    let recorded_at: String = row.try_get("recorded_at")?;
    Ok(ConsentRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        purpose: row.try_get("purpose")?,
        granted: granted != 0,
        recorded_at: parse_ts(&recorded_at)?,
    })
}
