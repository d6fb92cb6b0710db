//! SQLite persistence for the entity model.
//!
//! A single connection wrapped in `Arc<Mutex<_>>`; every operation runs on
//! the blocking thread-pool via `tokio::task::spawn_blocking`. Multi-step
//! operations (session create + eviction, article + board links, follow
//! migration, delivery claiming) use explicit transactions, which together
//! with the single-writer mutex serialize them the way `SELECT … FOR UPDATE`
//! / `SKIP LOCKED` would on a server database.

pub mod articles;
pub mod boards;
pub mod comments;
pub mod delivery_jobs;
pub mod feed_items;
pub mod follows;
pub mod interactions;
pub mod login_attempts;
pub mod moderation;
pub mod notifications;
pub mod push_subscriptions;
pub mod remote_actors;
mod schema;
pub mod sessions;
pub mod users;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Errors that storage operations can return.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested row does not exist.
    #[error("not found")]
    NotFound,
    /// A unique constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// An unexpected error in the underlying database.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound,
            rusqlite::Error::SqliteFailure(inner, _)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(e.to_string())
            }
            _ => StorageError::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Internal(format!("json: {e}"))
    }
}

/// Handle to the SQLite database.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::prepare(conn)
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn call<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("storage mutex poisoned");
            f(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Internal(format!("join: {e}")))?
    }

    /// Read a site-level setting.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = key.to_string();
        self.call(move |conn| {
            use rusqlite::OptionalExtension;
            Ok(conn
                .query_row(
                    "SELECT value FROM site_settings WHERE key = ?1",
                    [&key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    /// Insert or replace a site-level setting.
    pub async fn put_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        let value = value.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO site_settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [&key, &value],
            )?;
            Ok(())
        })
        .await
    }
}

/// Fixed-width RFC 3339 encoding so that string comparison in SQL matches
/// chronological order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Internal(format!("timestamp {raw:?}: {e}")))
}

pub(crate) fn decode_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.map(|s| decode_ts(&s)).transpose()
}
