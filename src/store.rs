//! SQLite-backed persistent store for user records and meta fields.
//!
//! All access goes through scoped transactions: [`Store::view`] for reads,
//! [`Store::update`] for writes. The connection sits behind a mutex, so
//! there is one writer at a time; transactions are short-lived, acquired
//! and released around each logical operation.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite database error.
    #[error("database error: {0}")]
    Database(String),

    /// User record serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A user record without an id cannot be saved.
    #[error("user id required")]
    MissingUserId,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// A user in the organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Numeric user id; zero means unassigned and is rejected on save.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Contact email.
    pub email: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id   INTEGER PRIMARY KEY,
    data TEXT NOT NULL
);
";

/// Application-level database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish()
    }
}

impl Store {
    /// Open (and initialize) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute `f` in the context of a read-only transaction.
    pub fn view<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let tx = conn.transaction()?;
        let out = f(&Tx { inner: &tx })?;
        tx.finish()?;
        Ok(out)
    }

    /// Execute `f` in the context of a writable transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back on
    /// error.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&Tx<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let tx = conn.transaction()?;
        let out = f(&Tx { inner: &tx })?;
        tx.commit()?;
        Ok(out)
    }
}

/// An application-level transaction handle.
pub struct Tx<'a> {
    inner: &'a rusqlite::Transaction<'a>,
}

impl Tx<'_> {
    /// Retrieve a meta field by key.
    pub fn meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StoreError::from)
    }

    /// Set a meta field.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Retrieve a user by id.
    pub fn user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let data: Option<String> = self
            .inner
            .query_row("SELECT data FROM users WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Store a user record. Rejects records with no id.
    pub fn save_user(&self, user: &User) -> Result<(), StoreError> {
        if user.id == 0 {
            return Err(StoreError::MissingUserId);
        }
        let data = serde_json::to_string(user)?;
        self.inner.execute(
            "INSERT OR REPLACE INTO users (id, data) VALUES (?1, ?2)",
            params![user.id, data],
        )?;
        Ok(())
    }
}
