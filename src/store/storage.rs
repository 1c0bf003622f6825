//! Store backends: SQLite for production, in-memory for tests.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;

use super::traits::PersistentStore;

/// SQLite-backed store. One row per key, JSON serialized as a blob.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self, StoreError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Default database path under the platform data directory.
  fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("fieldsync").join("store.db"))
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }
}

const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl PersistentStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

    let data: Option<Vec<u8>> = conn
      .query_row("SELECT value FROM kv_store WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()?;

    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
    let data = serde_json::to_vec(value)?;

    let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![key, data],
    )?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    Ok(())
  }
}

/// In-memory store with the same contract as `SqliteStore`.
///
/// Used in tests as a stand-in for the durable store: sharing one
/// `Arc<MemoryStore>` across two engine instances simulates a process
/// restart against the same on-disk state.
#[derive(Default)]
pub struct MemoryStore {
  values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl PersistentStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
    let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
    let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
    values.insert(key.to_string(), value.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
    values.remove(key);
    Ok(())
  }
}
