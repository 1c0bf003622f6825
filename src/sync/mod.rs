//! Offline-first master-data cache and synchronization engine.
//!
//! One refresh battery fetches every configured cache group through
//! `CacheEntryFetcher`, coordinated by `MasterDataOrchestrator` under a
//! global TTL gate and an in-flight lock. Writes made while offline go
//! through `OfflineMutationQueue` and are replayed in order once
//! connectivity returns. `SyncContext` is the thin facade the
//! presentation layer holds on to.

mod fetcher;
mod orchestrator;
mod queue;
mod state;

pub use fetcher::{CacheEntryFetcher, FetchSource, Fetched};
pub use orchestrator::{
  default_groups, FreshnessPolicy, GroupOutcome, MasterDataOrchestrator, RefreshOutcome,
  RefreshRun, FRESHNESS_MARKER_KEY,
};
pub use queue::{
  run_auto_drain, DrainReport, HaltedMutation, MutationOperation, OfflineMutationQueue,
  QueuedMutation,
};
pub use state::SyncContext;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One persisted reference-data set. Replaced wholesale on every
/// successful fetch; `fetched_at` doubles as the stale-write guard stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub payload: Value,
  /// Millisecond epoch of the fetch that produced this entry.
  pub fetched_at: i64,
}

/// Configuration row for one cache group: the persistence key consumers
/// read, and the endpoint path it is fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGroup {
  pub key: String,
  pub path: String,
}

pub(crate) fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}
