use crate::db::schema::SQLITE_INIT;
use crate::error::LabGuardError;
use crate::types::timestamp;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub type SqlitePool = Pool<Sqlite>;

/// Handle over the LabGuard SQLite database. Queries are grouped by table
/// in the sibling modules (`equipment`, `audit_log`, `keys`, `users`).
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, LabGuardError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(3);

        let pool = (|| {
            let opts = connect_opts.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(opts)
                    .await
            }
        })
        .retry(retry_policy)
        .notify(|err: &sqlx::Error, dur: Duration| {
            warn!("SQLite connect failed: {}, retrying in {:?}", err, dur);
        })
        .await?;

        let storage = Self::new(pool);
        storage.init_schema().await?;
        info!(database_url = %database_url, "storage ready");
        Ok(storage)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), LabGuardError> {
        // sqlx::query runs one statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    timestamp::decode(s).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    s.as_deref().map(parse_ts).transpose()
}

pub(crate) fn parse_enum<T: FromStr<Err = String>>(s: &str) -> Result<T, sqlx::Error> {
    s.parse::<T>().map_err(|e| sqlx::Error::Decode(e.into()))
}

pub(crate) fn fmt_opt_ts(ts: Option<&DateTime<Utc>>) -> Option<String> {
    ts.map(timestamp::encode)
}
