//! Shared test doubles for the sync engine.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::RemoteError;
use crate::net::RemoteSource;

/// Remote source scripted per path. The latest script for a path wins,
/// so tests can flip an endpoint between success and failure mid-test.
#[derive(Default)]
pub struct ScriptedRemote {
  responses: Mutex<HashMap<String, Result<Value, RemoteError>>>,
  calls: AtomicUsize,
  delay: Mutex<Option<Duration>>,
}

impl ScriptedRemote {
  pub fn new() -> Self {
    Self::default()
  }

  /// Script `path` to answer with `body`.
  pub fn ok(&self, path: &str, body: Value) {
    self.responses.lock().unwrap().insert(path.to_string(), Ok(body));
  }

  /// Script `path` to fail as unreachable.
  pub fn fail(&self, path: &str) {
    self.fail_with(
      path,
      RemoteError::Unreachable {
        path: path.to_string(),
        reason: "connection refused".into(),
      },
    );
  }

  /// Script `path` to fail with a specific error.
  pub fn fail_with(&self, path: &str, err: RemoteError) {
    self.responses.lock().unwrap().insert(path.to_string(), Err(err));
  }

  /// Sleep this long before answering, to let tests overlap calls.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Total fetches made, scripted or not.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::Relaxed)
  }

  fn lookup(&self, path: &str) -> Result<Value, RemoteError> {
    match self.responses.lock().unwrap().get(path) {
      Some(Ok(body)) => Ok(body.clone()),
      Some(Err(err)) => Err(clone_error(err)),
      None => Err(RemoteError::Unreachable {
        path: path.to_string(),
        reason: "unscripted path".into(),
      }),
    }
  }
}

impl RemoteSource for ScriptedRemote {
  async fn fetch_json(&self, path: &str) -> Result<Value, RemoteError> {
    self.calls.fetch_add(1, Ordering::Relaxed);

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    self.lookup(path)
  }
}

fn clone_error(err: &RemoteError) -> RemoteError {
  match err {
    RemoteError::Unreachable { path, reason } => RemoteError::Unreachable {
      path: path.clone(),
      reason: reason.clone(),
    },
    RemoteError::Status { path, status } => RemoteError::Status {
      path: path.clone(),
      status: *status,
    },
    RemoteError::Malformed { path, reason } => RemoteError::Malformed {
      path: path.clone(),
      reason: reason.clone(),
    },
  }
}
