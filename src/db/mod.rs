//! Database module: schema, row models and queries for persistent storage.
//!
//! Layout:
//! - `schema.rs`: SQL DDL for initializing the database (SQLite)
//! - `models.rs`: rows that never leave the storage/service boundary
//! - `sqlite.rs`: pool setup and shared decoding helpers
//! - `equipment.rs`, `audit_log.rs`, `keys.rs`, `users.rs`: per-table queries

mod audit_log;
mod equipment;
mod keys;
pub mod models;
pub mod schema;
pub mod sqlite;
mod users;

pub use models::{DbEncryptionKey, DbPrivacyRequest, DbUser, PrivacyRequestKind};
pub use schema::SQLITE_INIT;
pub use sqlite::{SqlitePool, Storage};
