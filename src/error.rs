//! Error types for the sync engine.
//!
//! Group-level failures inside a refresh battery are captured as run
//! outcomes, not errors; these types cover the individual operations
//! underneath (remote calls, store access, single-group fetches).

use thiserror::Error;

/// Failure of one remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
  /// The request could not complete (DNS, connect, timeout).
  /// Recovered by falling back to the last persisted entry.
  #[error("request to '{path}' could not complete: {reason}")]
  Unreachable { path: String, reason: String },

  /// The server answered with a non-success status.
  #[error("'{path}' returned HTTP {status}")]
  Status { path: String, status: u16 },

  /// The response body was not valid JSON. Treated the same as
  /// `Unreachable`: fall back to cache.
  #[error("response from '{path}' was not valid JSON: {reason}")]
  Malformed { path: String, reason: String },
}

/// Failure of the persistent key/value store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("store lock poisoned")]
  Poisoned,
}

/// Failure of a single cache-group fetch.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The remote call failed and there is no persisted copy to fall back
  /// to. Callers must treat the group as absent, not as an empty list.
  #[error("no remote data and no cached copy for '{key}'")]
  SourceUnavailable {
    key: String,
    #[source]
    source: RemoteError,
  },

  #[error(transparent)]
  Store(#[from] StoreError),
}
