//! Connectivity oracle gating refresh and drain decisions.

use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

/// Answers "is the device online right now?" and notifies on changes.
pub trait Reachability: Send + Sync {
  fn is_connected(&self) -> bool;

  /// Change notifications. The receiver yields the current state on
  /// `borrow` and wakes on every transition.
  fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Watch-channel backed reachability state.
///
/// The engine never guesses connectivity on its own; whoever embeds it
/// (the CLI probe below, or a platform connectivity callback) pushes
/// state in via `set_connected`.
pub struct NetworkMonitor {
  state: watch::Sender<bool>,
}

impl NetworkMonitor {
  pub fn new(initially_connected: bool) -> Self {
    let (state, _) = watch::channel(initially_connected);
    Self { state }
  }

  /// Record a connectivity transition. Setting the same value twice is a
  /// no-op for subscribers.
  pub fn set_connected(&self, connected: bool) {
    self.state.send_if_modified(|current| {
      if *current != connected {
        debug!(connected, "connectivity changed");
        *current = connected;
        true
      } else {
        false
      }
    });
  }

  /// Probe the API base URL once and record the result. Any HTTP answer
  /// counts as reachable; only a transport failure means offline.
  pub async fn probe(&self, base_url: &Url, timeout: Duration) -> bool {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build();

    let connected = match client {
      Ok(client) => client.get(base_url.clone()).send().await.is_ok(),
      Err(_) => false,
    };

    self.set_connected(connected);
    connected
  }
}

impl Reachability for NetworkMonitor {
  fn is_connected(&self) -> bool {
    *self.state.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }
}
