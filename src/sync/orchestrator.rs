//! Battery refresh of all configured cache groups.

use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::net::{Reachability, RemoteSource};
use crate::store::PersistentStore;

use super::fetcher::{CacheEntryFetcher, FetchSource};
use super::{now_ms, CacheGroup};

/// Well-known key of the global freshness marker: millisecond epoch of
/// the last battery that satisfied the freshness policy, stored as a
/// string. A crash mid-battery leaves it untouched.
pub const FRESHNESS_MARKER_KEY: &str = "cache_master_last";

/// Default battery. The `master_site`, `master_dept` and `cache_units`
/// keys are read directly by downstream consumers and must not change.
pub fn default_groups() -> Vec<CacheGroup> {
  [
    ("master_site", "/master/sites"),
    ("master_dept", "/master/departments"),
    ("master_category", "/master/categories"),
    ("cache_units", "/master/units"),
    ("master_supervisor", "/master/supervisors"),
    ("master_kpi", "/master/kpis"),
  ]
  .into_iter()
  .map(|(key, path)| CacheGroup {
    key: key.to_string(),
    path: path.to_string(),
  })
  .collect()
}

/// When the freshness marker may advance after a battery.
///
/// Field connectivity makes clean sweeps rare. Advancing on partial
/// success trades possibly-stale groups for not hammering the backend on
/// every screen focus; requiring a full sweep forces a retry on the next
/// trigger instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessPolicy {
  /// Advance when at least one group succeeded.
  #[default]
  AcceptPartial,
  /// Advance only when every group succeeded.
  RequireAll,
}

/// Per-group result within one battery.
#[derive(Debug, Clone)]
pub enum GroupOutcome {
  /// The group has a usable entry (fresh or fallen back to cache).
  Loaded(FetchSource),
  /// No remote data and no cached copy; the group is absent this run.
  Unavailable(String),
}

/// One battery execution. Ephemeral; never persisted.
#[derive(Debug, Clone)]
pub struct RefreshRun {
  pub started_at: i64,
  /// Outcomes in battery order.
  pub outcomes: Vec<(String, GroupOutcome)>,
}

impl RefreshRun {
  /// Groups that got fresh network data this run.
  pub fn refreshed(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| matches!(o, GroupOutcome::Loaded(FetchSource::Network)))
      .count()
  }

  /// Groups with no usable data at all.
  pub fn unavailable(&self) -> usize {
    self
      .outcomes
      .iter()
      .filter(|(_, o)| matches!(o, GroupOutcome::Unavailable(_)))
      .count()
  }
}

/// What a `refresh_all` call amounted to.
#[derive(Debug)]
pub enum RefreshOutcome {
  /// This call executed the battery.
  Completed(RefreshRun),
  /// The marker is within the TTL window; no network was touched.
  SkippedFresh,
  /// The reachability oracle reports offline; marker untouched.
  SkippedOffline,
  /// Another caller's battery was in flight; this call waited for it to
  /// finish rather than starting a second one.
  AlreadyRunning,
}

/// Coordinates the full battery of cache groups under one TTL gate and
/// one in-flight lock. Owns nothing process-global: store, remote and
/// oracle are injected, so tests run against doubles.
pub struct MasterDataOrchestrator<S, R, N> {
  fetcher: CacheEntryFetcher<S, R>,
  store: Arc<S>,
  net: Arc<N>,
  groups: Vec<CacheGroup>,
  ttl: Duration,
  policy: FreshnessPolicy,
  in_flight: watch::Sender<bool>,
  run_lock: tokio::sync::Mutex<()>,
}

impl<S, R, N> MasterDataOrchestrator<S, R, N>
where
  S: PersistentStore,
  R: RemoteSource,
  N: Reachability,
{
  pub fn new(
    store: Arc<S>,
    remote: Arc<R>,
    net: Arc<N>,
    groups: Vec<CacheGroup>,
    ttl: Duration,
    policy: FreshnessPolicy,
  ) -> Self {
    let (in_flight, _) = watch::channel(false);

    Self {
      fetcher: CacheEntryFetcher::new(store.clone(), remote),
      store,
      net,
      groups,
      ttl,
      policy,
      in_flight,
      run_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Refresh every configured group, subject to the freshness and
  /// connectivity gates.
  ///
  /// Callable from every screen focus: within the TTL window it returns
  /// without touching the network, and a caller arriving while a battery
  /// is in flight waits for that battery instead of starting another.
  pub async fn refresh_all(&self) -> RefreshOutcome {
    if self.is_fresh() {
      return RefreshOutcome::SkippedFresh;
    }

    if !self.net.is_connected() {
      return RefreshOutcome::SkippedOffline;
    }

    let _guard = match self.run_lock.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        // Join the in-flight run: resolve once it releases the lock.
        let _wait = self.run_lock.lock().await;
        return RefreshOutcome::AlreadyRunning;
      }
    };

    // A caller that raced past the gates while the previous battery was
    // finishing must not start a back-to-back one.
    if self.is_fresh() {
      return RefreshOutcome::SkippedFresh;
    }

    self.in_flight.send_replace(true);
    let run = self.run_battery().await;
    self.advance_marker(&run);
    self.in_flight.send_replace(false);

    RefreshOutcome::Completed(run)
  }

  /// True exactly while a battery is executing.
  pub fn is_refreshing(&self) -> bool {
    *self.in_flight.borrow()
  }

  /// Change notifications for the refresh flag.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.in_flight.subscribe()
  }

  pub fn groups(&self) -> &[CacheGroup] {
    &self.groups
  }

  /// Read the persisted entry for one group.
  pub fn cached_entry(&self, key: &str) -> Option<super::CacheEntry> {
    self.fetcher.load_cached(key).ok().flatten()
  }

  /// Drop the freshness marker and every group entry. Used on logout and
  /// forced refresh; the next trigger rebuilds everything from the
  /// network.
  pub fn invalidate(&self) -> Result<(), crate::error::StoreError> {
    self.store.remove(FRESHNESS_MARKER_KEY)?;
    for group in &self.groups {
      self.store.remove(&group.key)?;
    }
    Ok(())
  }

  /// Millisecond age of the freshness marker, if one is persisted.
  pub fn marker_age_ms(&self) -> Option<i64> {
    let value = match self.store.get(FRESHNESS_MARKER_KEY) {
      Ok(value) => value?,
      Err(err) => {
        warn!(%err, "could not read freshness marker");
        return None;
      }
    };

    let stamp = match value {
      Value::String(s) => s.parse::<i64>().ok()?,
      Value::Number(n) => n.as_i64()?,
      _ => return None,
    };

    Some(now_ms() - stamp)
  }

  fn is_fresh(&self) -> bool {
    match self.marker_age_ms() {
      Some(age) => age < self.ttl.num_milliseconds(),
      None => false,
    }
  }

  /// Run every group to completion or failure, in order. One flaky
  /// endpoint never aborts the rest of the battery.
  async fn run_battery(&self) -> RefreshRun {
    let started_at = now_ms();
    let mut outcomes = Vec::with_capacity(self.groups.len());

    for group in &self.groups {
      let outcome = match self.fetcher.fetch(&group.key, &group.path).await {
        Ok(fetched) => GroupOutcome::Loaded(fetched.source),
        Err(err) => GroupOutcome::Unavailable(err.to_string()),
      };
      outcomes.push((group.key.clone(), outcome));
    }

    let run = RefreshRun {
      started_at,
      outcomes,
    };

    info!(
      groups = run.outcomes.len(),
      refreshed = run.refreshed(),
      unavailable = run.unavailable(),
      "refresh battery finished"
    );

    run
  }

  /// Advance the marker if the run satisfied the freshness policy. Only
  /// runs where every group has been attempted reach this point, so a
  /// crash mid-battery never marks data fresh.
  fn advance_marker(&self, run: &RefreshRun) {
    let advance = match self.policy {
      FreshnessPolicy::AcceptPartial => run.refreshed() > 0,
      FreshnessPolicy::RequireAll => run.refreshed() == run.outcomes.len(),
    };

    if !advance {
      info!("freshness marker not advanced; next trigger will retry");
      return;
    }

    let stamp = Value::String(now_ms().to_string());
    if let Err(err) = self.store.set(FRESHNESS_MARKER_KEY, &stamp) {
      warn!(%err, "could not persist freshness marker");
    }
  }
}
