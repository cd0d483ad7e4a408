//! Persistent key-value store backing the OTA update client.
//!
//! The update client tracks what is installed on the device (artifact
//! name, group, provides) across reboots. This crate provides a small
//! transactional byte-string KV store on top of SQLite for that data.
//!
//! Writes outside a transaction auto-commit. [`DeviceStore::with_transaction`]
//! batches several writes atomically, which the context layer uses to keep
//! the artifact slots consistent during a commit.

mod error;

pub use error::StoreError;

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

/// Read access shared by [`DeviceStore`] and [`StoreTransaction`].
///
/// Code that only loads data (e.g. the provides loader) can run both
/// against the plain store and inside an open transaction.
pub trait StoreRead {
    /// Read the value stored under `key`.
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Read the value under `key` as a UTF-8 string, if present.
    ///
    /// Returns `Ok(None)` when the key does not exist. Invalid UTF-8 is
    /// reported as a database error since the store only ever holds
    /// strings and JSON for these slots.
    fn read_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.read(key) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Database(rusqlite::Error::Utf8Error(e.utf8_error()))),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Persistent device state store.
///
/// One store exists per `data_store_dir`; the update client is the only
/// writer. All values are raw byte strings.
pub struct DeviceStore {
    conn: Option<Connection>,
}

impl DeviceStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            [],
        )?;
        debug!(path = %path.display(), "Opened device state store");
        Ok(Self { conn: Some(conn) })
    }

    /// Open an in-memory store. Only useful for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            [],
        )?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    /// Write `value` under `key`, replacing any existing value.
    pub fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove `key`. Removing a missing key is not an error.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Run `f` inside a transaction.
    ///
    /// If `f` returns `Ok`, the whole batch is committed atomically; any
    /// error rolls back every write made through the transaction handle.
    pub fn with_transaction<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreTransaction<'_>) -> Result<T, StoreError>,
    {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let tx = conn.transaction()?;
        let result = {
            let mut handle = StoreTransaction { tx: &tx };
            f(&mut handle)
        };
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                Err(e)
            }
        }
    }

    /// Close the store. Any further use returns [`StoreError::Closed`].
    pub fn close(&mut self) {
        self.conn = None;
    }
}

impl StoreRead for DeviceStore {
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let value: Option<Vec<u8>> = self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        value.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

/// Handle for writes batched inside [`DeviceStore::with_transaction`].
pub struct StoreTransaction<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl StoreTransaction<'_> {
    /// Write `value` under `key` within the transaction.
    pub fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove `key` within the transaction.
    pub fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.tx
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl StoreRead for StoreTransaction<'_> {
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let value: Option<Vec<u8>> = self
            .tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        value.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
