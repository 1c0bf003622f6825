//! Process-wide facade the presentation layer holds on to.

use std::sync::Arc;
use tokio::sync::watch;

use crate::net::{Reachability, RemoteSource};
use crate::store::PersistentStore;

use super::orchestrator::{MasterDataOrchestrator, RefreshOutcome};
use super::queue::OfflineMutationQueue;

/// Clonable handle exposing refresh progress and the pending-mutation
/// count to screens. Initialized once at startup; holds nothing beyond
/// the shared engine, so teardown is just dropping it with the process.
pub struct SyncContext<S, R, N> {
  orchestrator: Arc<MasterDataOrchestrator<S, R, N>>,
  queue: Arc<OfflineMutationQueue<S>>,
}

impl<S, R, N> SyncContext<S, R, N>
where
  S: PersistentStore,
  R: RemoteSource,
  N: Reachability,
{
  pub fn new(
    orchestrator: Arc<MasterDataOrchestrator<S, R, N>>,
    queue: Arc<OfflineMutationQueue<S>>,
  ) -> Self {
    Self {
      orchestrator,
      queue,
    }
  }

  /// Kick off (or join) a refresh battery. Re-entrant: a call made while
  /// a battery is in flight does not start a second one, and resolves
  /// only once the current battery finishes.
  pub async fn trigger_refresh(&self) -> RefreshOutcome {
    self.orchestrator.refresh_all().await
  }

  /// True exactly while a battery is executing; false after completion,
  /// including after partial failure.
  pub fn is_refreshing(&self) -> bool {
    self.orchestrator.is_refreshing()
  }

  /// Change notifications for the refresh flag, for spinner binding.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.orchestrator.subscribe()
  }

  /// Queued offline writes, for UI badges. O(1).
  pub fn pending_mutations(&self) -> usize {
    self.queue.count()
  }
}

impl<S, R, N> Clone for SyncContext<S, R, N> {
  fn clone(&self) -> Self {
    Self {
      orchestrator: Arc::clone(&self.orchestrator),
      queue: Arc::clone(&self.queue),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::NetworkMonitor;
  use crate::store::MemoryStore;
  use crate::sync::{CacheGroup, FreshnessPolicy};
  use crate::testing::ScriptedRemote;
  use chrono::Duration;
  use serde_json::json;
  use std::time::Duration as StdDuration;

  fn context(
    remote: Arc<ScriptedRemote>,
    groups: Vec<CacheGroup>,
  ) -> SyncContext<MemoryStore, ScriptedRemote, NetworkMonitor> {
    let store = Arc::new(MemoryStore::new());
    let net = Arc::new(NetworkMonitor::new(true));

    let orchestrator = Arc::new(MasterDataOrchestrator::new(
      store.clone(),
      remote,
      net,
      groups,
      Duration::minutes(10),
      FreshnessPolicy::AcceptPartial,
    ));
    let queue = Arc::new(OfflineMutationQueue::load(store, 5).unwrap());

    SyncContext::new(orchestrator, queue)
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_triggers_run_one_battery() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.set_delay(StdDuration::from_millis(50));
    remote.ok("/master_site", json!([{"id": 1}]));
    remote.ok("/master_dept", json!([{"id": 2}]));

    let groups = vec![
      CacheGroup {
        key: "master_site".into(),
        path: "/master_site".into(),
      },
      CacheGroup {
        key: "master_dept".into(),
        path: "/master_dept".into(),
      },
    ];

    let ctx = Arc::new(context(remote.clone(), groups));

    let t1 = tokio::spawn({
      let ctx = ctx.clone();
      async move { ctx.trigger_refresh().await }
    });
    let t2 = tokio::spawn({
      let ctx = ctx.clone();
      async move { ctx.trigger_refresh().await }
    });

    let (r1, r2) = (t1.await.unwrap(), t2.await.unwrap());

    // Exactly one battery hit the network, and both calls resolved only
    // after it finished.
    assert_eq!(remote.calls(), 2);
    assert!(!ctx.is_refreshing());
    assert!(
      matches!(r1, RefreshOutcome::Completed(_)) || matches!(r2, RefreshOutcome::Completed(_))
    );
  }

  #[tokio::test]
  async fn test_flag_clears_after_partial_failure() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.fail("/master_site");

    let groups = vec![CacheGroup {
      key: "master_site".into(),
      path: "/master_site".into(),
    }];

    let ctx = context(remote, groups);
    assert!(!ctx.is_refreshing());

    ctx.trigger_refresh().await;
    assert!(!ctx.is_refreshing());
  }

  #[tokio::test]
  async fn test_pending_mutations_reflects_queue() {
    let ctx = context(Arc::new(ScriptedRemote::new()), Vec::new());
    assert_eq!(ctx.pending_mutations(), 0);
  }
}
