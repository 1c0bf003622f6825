//! Single-group fetch with cache fallback.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{FetchError, StoreError};
use crate::net::RemoteSource;
use crate::store::PersistentStore;

use super::{now_ms, CacheEntry};

/// Where a fetched entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Fresh data from the remote source, now persisted.
  Network,
  /// The remote call failed; this is the last persisted entry.
  CacheFallback,
}

/// Result of one group fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
  pub entry: CacheEntry,
  pub source: FetchSource,
}

/// Fetches one named reference-data set: exactly one network round-trip,
/// falling back to the persisted copy when the remote is unreachable or
/// returns garbage. All group endpoints go through this one path so the
/// fallback policy cannot drift between groups.
pub struct CacheEntryFetcher<S, R> {
  store: Arc<S>,
  remote: Arc<R>,
}

impl<S: PersistentStore, R: RemoteSource> CacheEntryFetcher<S, R> {
  pub fn new(store: Arc<S>, remote: Arc<R>) -> Self {
    Self { store, remote }
  }

  /// Fetch the group persisted under `key` from `path`.
  ///
  /// On success the entry is persisted (replacing the prior one) and
  /// returned. On remote failure the last persisted entry is returned
  /// unchanged; with no persisted entry the group is reported as
  /// `SourceUnavailable` so callers can tell "no data exists" from
  /// "we don't know yet".
  pub async fn fetch(&self, key: &str, path: &str) -> Result<Fetched, FetchError> {
    match self.remote.fetch_json(path).await {
      Ok(body) => {
        let entry = CacheEntry {
          key: key.to_string(),
          payload: extract_payload(body),
          fetched_at: now_ms(),
        };
        self.persist(&entry)?;

        Ok(Fetched {
          entry,
          source: FetchSource::Network,
        })
      }
      Err(err) => {
        warn!(key, %err, "remote fetch failed, trying cached copy");

        match self.load_cached(key)? {
          Some(entry) => Ok(Fetched {
            entry,
            source: FetchSource::CacheFallback,
          }),
          None => Err(FetchError::SourceUnavailable {
            key: key.to_string(),
            source: err,
          }),
        }
      }
    }
  }

  /// Read the persisted entry for `key`, if any.
  pub fn load_cached(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
    match self.store.get(key)? {
      Some(value) => Ok(serde_json::from_value(value).ok()),
      None => Ok(None),
    }
  }

  /// Persist `entry` unless the store already holds a newer one.
  /// Batteries can interleave with direct fetch calls, so a slow write
  /// must not clobber a later successful one.
  fn persist(&self, entry: &CacheEntry) -> Result<(), StoreError> {
    if let Some(existing) = self.load_cached(&entry.key)? {
      if existing.fetched_at > entry.fetched_at {
        debug!(key = %entry.key, "skipping stale write");
        return Ok(());
      }
    }

    self.store.set(&entry.key, &serde_json::to_value(entry)?)
  }
}

/// Accept either a bare array/object or an envelope with a `data` field.
/// Endpoints are inconsistent about this in the field, so both shapes are
/// first-class.
fn extract_payload(body: Value) -> Value {
  match body {
    Value::Object(mut map) if map.contains_key("data") => {
      map.remove("data").unwrap_or(Value::Null)
    }
    other => other,
  }
}
