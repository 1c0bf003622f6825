//! Durable FIFO queue of writes made while offline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::error::{RemoteError, StoreError};
use crate::net::Reachability;
use crate::store::PersistentStore;

use super::now_ms;

/// Well-known key the queue is persisted under.
pub const QUEUE_KEY: &str = "offline_queue";

/// The intended write: a domain tag plus the endpoint and body to replay
/// it against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationOperation {
  /// Domain tag, e.g. "jobcard.close" or "attendance.checkin".
  pub kind: String,
  pub path: String,
  pub body: Value,
}

/// One queued write. Lives in the store until its replay is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMutation {
  pub id: u64,
  pub operation: MutationOperation,
  pub enqueued_at: i64,
  pub attempts: u32,
}

/// The head mutation a drain stopped on.
#[derive(Debug, Clone)]
pub struct HaltedMutation {
  pub id: u64,
  pub attempts: u32,
  /// Attempts reached the configured threshold; surface to the user
  /// instead of retrying silently forever.
  pub exhausted: bool,
  pub error: String,
}

/// Summary of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
  pub committed: usize,
  pub halted: Option<HaltedMutation>,
}

/// Durable FIFO queue of user writes made while offline.
///
/// Replay is strictly enqueue order: edits against the same resource must
/// land in the order the user made them, so a failing head mutation halts
/// the drain rather than letting later writes commit ahead of it. The
/// head item is in flight only for the duration of one send; on failure
/// it returns to pending with `attempts` incremented.
pub struct OfflineMutationQueue<S> {
  store: Arc<S>,
  items: Mutex<VecDeque<QueuedMutation>>,
  next_id: AtomicU64,
  // Kept in step with `items` so UI badges never parse the queue body.
  count: AtomicUsize,
  drain_lock: tokio::sync::Mutex<()>,
  max_attempts: u32,
}

impl<S: PersistentStore> OfflineMutationQueue<S> {
  /// Load the persisted queue from the store. Call once at startup; the
  /// in-memory deque mirrors the persisted state from then on.
  pub fn load(store: Arc<S>, max_attempts: u32) -> Result<Self, StoreError> {
    let items: VecDeque<QueuedMutation> = match store.get(QUEUE_KEY)? {
      Some(value) => serde_json::from_value(value)?,
      None => VecDeque::new(),
    };

    let next_id = items.iter().map(|m| m.id).max().map_or(1, |id| id + 1);
    let count = items.len();

    Ok(Self {
      store,
      items: Mutex::new(items),
      next_id: AtomicU64::new(next_id),
      count: AtomicUsize::new(count),
      drain_lock: tokio::sync::Mutex::new(()),
      max_attempts,
    })
  }

  /// Append a mutation and persist before returning, so an app kill
  /// right after enqueue cannot lose it.
  pub fn enqueue(&self, operation: MutationOperation) -> Result<u64, StoreError> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mutation = QueuedMutation {
      id,
      operation,
      enqueued_at: now_ms(),
      attempts: 0,
    };

    let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
    items.push_back(mutation);
    self.persist(&items)?;
    self.count.store(items.len(), Ordering::Relaxed);

    Ok(id)
  }

  /// Pending mutations, for UI badges.
  pub fn count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Snapshot of the pending queue, head first.
  pub fn pending(&self) -> Result<Vec<QueuedMutation>, StoreError> {
    let items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
    Ok(items.iter().cloned().collect())
  }

  /// Replay queued mutations in order until the queue is empty or one
  /// send fails.
  ///
  /// The item lock is released around each send, so an enqueue during a
  /// drain lands at the back and is picked up by the same pass. Only one
  /// drain runs at a time; a concurrent caller waits its turn (and
  /// usually finds an empty queue).
  pub async fn drain<F, Fut>(&self, send: F) -> Result<DrainReport, StoreError>
  where
    F: Fn(QueuedMutation) -> Fut,
    Fut: Future<Output = Result<(), RemoteError>>,
  {
    let _guard = self.drain_lock.lock().await;
    let mut report = DrainReport::default();

    loop {
      let head = {
        let items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
        items.front().cloned()
      };
      let Some(mutation) = head else { break };

      match send(mutation.clone()).await {
        Ok(()) => {
          let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
          // Enqueues only touch the back, so the head is still ours.
          if items.front().map(|m| m.id) == Some(mutation.id) {
            items.pop_front();
          }
          self.persist(&items)?;
          self.count.store(items.len(), Ordering::Relaxed);
          report.committed += 1;
        }
        Err(err) => {
          let attempts = {
            let mut items = self.items.lock().map_err(|_| StoreError::Poisoned)?;
            let attempts = match items.front_mut() {
              Some(front) if front.id == mutation.id => {
                front.attempts += 1;
                front.attempts
              }
              _ => mutation.attempts + 1,
            };
            self.persist(&items)?;
            attempts
          };

          let exhausted = attempts >= self.max_attempts;
          if exhausted {
            warn!(
              id = mutation.id,
              attempts, "queued mutation exceeded retry threshold"
            );
          }

          report.halted = Some(HaltedMutation {
            id: mutation.id,
            attempts,
            exhausted,
            error: err.to_string(),
          });
          break;
        }
      }
    }

    if report.committed > 0 {
      info!(committed = report.committed, "drained offline mutations");
    }

    Ok(report)
  }

  fn persist(&self, items: &VecDeque<QueuedMutation>) -> Result<(), StoreError> {
    self.store.set(QUEUE_KEY, &serde_json::to_value(items)?)
  }
}

/// Drain on every offline-to-online transition until the reachability
/// channel closes. Meant to be spawned once at startup.
pub async fn run_auto_drain<S, N, F, Fut>(queue: Arc<OfflineMutationQueue<S>>, net: &N, send: F)
where
  S: PersistentStore,
  N: Reachability,
  F: Fn(QueuedMutation) -> Fut,
  Fut: Future<Output = Result<(), RemoteError>>,
{
  let mut rx = net.subscribe();
  let mut was_connected = *rx.borrow_and_update();

  if was_connected {
    if let Err(err) = queue.drain(&send).await {
      warn!(%err, "auto-drain failed");
    }
  }

  while rx.changed().await.is_ok() {
    let connected = *rx.borrow_and_update();
    if connected && !was_connected {
      if let Err(err) = queue.drain(&send).await {
        warn!(%err, "auto-drain failed");
      }
    }
    was_connected = connected;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::NetworkMonitor;
  use crate::store::MemoryStore;
  use serde_json::json;
  use std::sync::atomic::AtomicBool;

  fn op(kind: &str) -> MutationOperation {
    MutationOperation {
      kind: kind.to_string(),
      path: format!("/ops/{}", kind),
      body: json!({"kind": kind}),
    }
  }

  fn queue(store: Arc<MemoryStore>) -> OfflineMutationQueue<MemoryStore> {
    OfflineMutationQueue::load(store, 5).unwrap()
  }

  #[tokio::test]
  async fn test_fifo_halts_on_first_failure() {
    let queue = queue(Arc::new(MemoryStore::new()));
    let a = queue.enqueue(op("a")).unwrap();
    let b = queue.enqueue(op("b")).unwrap();
    let _c = queue.enqueue(op("c")).unwrap();

    let attempted = Arc::new(Mutex::new(Vec::new()));
    let report = queue
      .drain(|m| {
        let attempted = attempted.clone();
        async move {
          attempted.lock().unwrap().push(m.operation.kind.clone());
          if m.operation.kind == "b" {
            Err(RemoteError::Status {
              path: m.operation.path,
              status: 500,
            })
          } else {
            Ok(())
          }
        }
      })
      .await
      .unwrap();

    // A committed, B pending with one attempt, C never attempted.
    assert_eq!(report.committed, 1);
    let halted = report.halted.unwrap();
    assert_eq!(halted.id, b);
    assert_eq!(halted.attempts, 1);
    assert!(!halted.exhausted);

    assert_eq!(*attempted.lock().unwrap(), vec!["a", "b"]);

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].operation.kind, "b");
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[1].operation.kind, "c");
    assert_eq!(pending[1].attempts, 0);
    assert!(queue.pending().unwrap().iter().all(|m| m.id != a));
  }

  #[tokio::test]
  async fn test_queue_survives_restart() {
    let store = Arc::new(MemoryStore::new());

    {
      let queue = queue(store.clone());
      queue.enqueue(op("checkin")).unwrap();
    }

    // Same store, new process.
    let queue = queue(store);
    assert_eq!(queue.count(), 1);

    let report = queue.drain(|_| async { Ok(()) }).await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(queue.count(), 0);
  }

  #[tokio::test]
  async fn test_restart_does_not_reuse_ids() {
    let store = Arc::new(MemoryStore::new());
    let first_id = {
      let queue = queue(store.clone());
      queue.enqueue(op("a")).unwrap()
    };

    let queue = queue(store);
    let second_id = queue.enqueue(op("b")).unwrap();
    assert!(second_id > first_id);
  }

  #[tokio::test]
  async fn test_enqueue_during_drain_is_picked_up() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(OfflineMutationQueue::load(store, 5).unwrap());
    queue.enqueue(op("a")).unwrap();

    let queue_ref = queue.clone();
    let injected = AtomicBool::new(false);
    let report = queue
      .drain(|m| {
        let queue_ref = queue_ref.clone();
        let inject = m.operation.kind == "a" && !injected.swap(true, Ordering::Relaxed);
        async move {
          if inject {
            queue_ref.enqueue(op("late")).unwrap();
          }
          Ok(())
        }
      })
      .await
      .unwrap();

    assert_eq!(report.committed, 2);
    assert_eq!(queue.count(), 0);
  }

  #[tokio::test]
  async fn test_attempts_accumulate_until_exhausted() {
    let store = Arc::new(MemoryStore::new());
    let queue = OfflineMutationQueue::load(store, 2).unwrap();
    queue.enqueue(op("a")).unwrap();

    let fail = |m: QueuedMutation| async move {
      Err(RemoteError::Status {
        path: m.operation.path,
        status: 503,
      })
    };

    let report = queue.drain(fail).await.unwrap();
    assert!(!report.halted.unwrap().exhausted);

    let report = queue.drain(fail).await.unwrap();
    let halted = report.halted.unwrap();
    assert_eq!(halted.attempts, 2);
    assert!(halted.exhausted);

    // The escape valve flags it; the item itself stays queued.
    assert_eq!(queue.count(), 1);
  }

  #[tokio::test]
  async fn test_count_is_durable_across_restart() {
    let store = Arc::new(MemoryStore::new());
    {
      let queue = queue(store.clone());
      queue.enqueue(op("a")).unwrap();
      queue.enqueue(op("b")).unwrap();
    }

    assert_eq!(queue(store).count(), 2);
  }

  #[tokio::test]
  async fn test_auto_drain_fires_on_reconnect() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(OfflineMutationQueue::load(store, 5).unwrap());
    queue.enqueue(op("a")).unwrap();

    let net = Arc::new(NetworkMonitor::new(false));

    let task = {
      let queue = queue.clone();
      let net = net.clone();
      tokio::spawn(async move {
        run_auto_drain(queue, net.as_ref(), |_| async { Ok(()) }).await;
      })
    };

    net.set_connected(true);

    // Poll until the spawned drain has emptied the queue.
    for _ in 0..100 {
      if queue.count() == 0 {
        break;
      }
      tokio::task::yield_now().await;
    }
    assert_eq!(queue.count(), 0);

    task.abort();
  }
}
