//! Store contract shared by the sqlite backend and the in-memory double.

use serde_json::Value;

use crate::error::StoreError;

/// Durable key/value store for JSON blobs.
///
/// Writes to different keys are independent; a write replaces the prior
/// value for its key atomically, so a failed or partial operation higher
/// up never corrupts what was already persisted.
pub trait PersistentStore: Send + Sync {
  /// Read the value stored under `key`, if any.
  fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

  /// Replace the value stored under `key`.
  fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;

  /// Delete the value stored under `key`. Deleting a missing key is not
  /// an error.
  fn remove(&self, key: &str) -> Result<(), StoreError>;
}
