use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};

use super::models::DbEncryptionKey;
use super::sqlite::{Storage, fmt_opt_ts, parse_opt_ts, parse_ts};
use crate::error::LabGuardError;
use crate::types::timestamp;

const KEY_COLUMNS: &str = "key_id, purpose, wrapped_key, created_at, expires_at, rotated_at, active";

impl Storage {
    pub async fn insert_key(
        conn: &mut SqliteConnection,
        key: &DbEncryptionKey,
    ) -> Result<(), LabGuardError> {
        sqlx::query(
            r#"
            INSERT INTO encryption_keys (
                key_id, purpose, wrapped_key, created_at, expires_at, rotated_at, active
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.key_id)
        .bind(&key.purpose)
        .bind(&key.wrapped_key)
        .bind(timestamp::encode(&key.created_at))
        .bind(timestamp::encode(&key.expires_at))
        .bind(fmt_opt_ts(key.rotated_at.as_ref()))
        .bind(key.active as i64)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Deactivate every active key for `purpose` and insert `new_key`.
    /// Returns the ids of the keys that were retired.
    pub async fn rotate_key(
        conn: &mut SqliteConnection,
        new_key: &DbEncryptionKey,
        rotated_at: DateTime<Utc>,
    ) -> Result<Vec<String>, LabGuardError> {
        let retired: Vec<(String,)> = sqlx::query_as(
            "SELECT key_id FROM encryption_keys WHERE purpose = ? AND active = 1 ORDER BY created_at",
        )
        .bind(&new_key.purpose)
        .fetch_all(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE encryption_keys SET active = 0, rotated_at = ? WHERE purpose = ? AND active = 1",
        )
        .bind(timestamp::encode(&rotated_at))
        .bind(&new_key.purpose)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO encryption_keys (
                key_id, purpose, wrapped_key, created_at, expires_at, rotated_at, active
            ) VALUES (?, ?, ?, ?, ?, NULL, 1)
            "#,
        )
        .bind(&new_key.key_id)
        .bind(&new_key.purpose)
        .bind(&new_key.wrapped_key)
        .bind(timestamp::encode(&new_key.created_at))
        .bind(timestamp::encode(&new_key.expires_at))
        .execute(&mut *conn)
        .await?;

        Ok(retired.into_iter().map(|r| r.0).collect())
    }

    pub async fn get_key(&self, key_id: &str) -> Result<Option<DbEncryptionKey>, LabGuardError> {
        let row = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM encryption_keys WHERE key_id = ?"
        ))
        .bind(key_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(row_to_key).transpose()
    }

    /// Newest active key for a purpose.
    pub async fn active_key(&self, purpose: &str) -> Result<Option<DbEncryptionKey>, LabGuardError> {
        let row = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM encryption_keys
             WHERE purpose = ? AND active = 1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(purpose)
        .fetch_optional(self.pool())
        .await?;
        row.map(row_to_key).transpose()
    }

    pub async fn list_keys(&self) -> Result<Vec<DbEncryptionKey>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM encryption_keys ORDER BY purpose, created_at"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_key).collect()
    }

    /// Active keys whose expiry is at or before `now`.
    pub async fn list_expired_active_keys(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DbEncryptionKey>, LabGuardError> {
        let rows = sqlx::query(&format!(
            "SELECT {KEY_COLUMNS} FROM encryption_keys
             WHERE active = 1 AND expires_at <= ? ORDER BY purpose, created_at"
        ))
        .bind(timestamp::encode(&now))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(row_to_key).collect()
    }
}

fn row_to_key(row: SqliteRow) -> Result<DbEncryptionKey, LabGuardError> {
    let created_at: String = row.try_get("created_at")?;
    let expires_at: String = row.try_get("expires_at")?;
    let rotated_at: Option<String> = row.try_get("rotated_at")?;
    let active_i: i64 = row.try_get("active")?;

    Ok(DbEncryptionKey {
        key_id: row.try_get("key_id")?,
        purpose: row.try_get("purpose")?,
        wrapped_key: row.try_get("wrapped_key")?,
        created_at: parse_ts(&created_at)?,
        expires_at: parse_ts(&expires_at)?,
        rotated_at: parse_opt_ts(rotated_at)?,
        active: active_i != 0,
    })
}
