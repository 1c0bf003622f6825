//! Network collaborators: the reachability oracle and the remote API source.

mod reachability;
mod remote;

pub use reachability::{NetworkMonitor, Reachability};
pub use remote::{HttpRemote, RemoteSource};
