mod config;
mod error;
mod net;
mod store;
mod sync;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::net::{HttpRemote, NetworkMonitor, Reachability};
use crate::store::SqliteStore;
use crate::sync::{
  run_auto_drain, MasterDataOrchestrator, MutationOperation, OfflineMutationQueue, QueuedMutation,
  RefreshOutcome, SyncContext,
};

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline-first master-data sync for field-operations clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run one refresh battery (subject to the TTL and connectivity gates)
  Refresh {
    /// Invalidate cached entries and the freshness marker first
    #[arg(long)]
    force: bool,
  },
  /// Show cache freshness and the pending-mutation count
  Status,
  /// Queue a write to replay once connectivity allows
  Enqueue {
    /// Domain tag, e.g. "jobcard.close"
    #[arg(long)]
    kind: String,
    /// Endpoint path the write is replayed against
    #[arg(long)]
    path: String,
    /// JSON body
    #[arg(long)]
    body: String,
  },
  /// Replay queued offline mutations now
  Drain,
  /// Keep probing connectivity, refreshing and draining as it allows
  Watch {
    /// Seconds between connectivity probes
    #[arg(long, default_value_t = 60)]
    interval: u64,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let token = Config::get_api_token()?;

  let store = Arc::new(SqliteStore::open()?);
  let remote = Arc::new(HttpRemote::new(
    &config.api.base_url,
    token,
    Duration::from_secs(config.api.timeout_secs),
  )?);
  let net = Arc::new(NetworkMonitor::new(false));
  net.probe(remote.base_url(), Duration::from_secs(3)).await;

  let orchestrator = Arc::new(MasterDataOrchestrator::new(
    store.clone(),
    remote.clone(),
    net.clone(),
    config.cache.groups(),
    config.cache.ttl(),
    config.cache.freshness,
  ));
  let queue = Arc::new(OfflineMutationQueue::load(
    store,
    config.queue.max_attempts,
  )?);
  let context = SyncContext::new(orchestrator.clone(), queue.clone());

  match args.command {
    Command::Refresh { force } => {
      if force {
        orchestrator.invalidate()?;
      }
      report_refresh(context.trigger_refresh().await);
    }

    Command::Status => {
      match orchestrator.marker_age_ms() {
        Some(age) => println!("last full refresh: {} min ago", age / 60_000),
        None => println!("last full refresh: never"),
      }

      for group in orchestrator.groups() {
        match orchestrator.cached_entry(&group.key) {
          Some(entry) => {
            let age = (chrono::Utc::now().timestamp_millis() - entry.fetched_at) / 60_000;
            println!("  {:<20} cached {} min ago", group.key, age);
          }
          None => println!("  {:<20} absent", group.key),
        }
      }

      println!("pending mutations: {}", context.pending_mutations());
      for m in queue.pending()?.iter().take(5) {
        println!("  #{} {} (attempts {})", m.id, m.operation.kind, m.attempts);
      }
    }

    Command::Enqueue { kind, path, body } => {
      let body: serde_json::Value = serde_json::from_str(&body)?;
      let id = queue.enqueue(MutationOperation { kind, path, body })?;
      println!("queued mutation {} ({} pending)", id, queue.count());
    }

    Command::Drain => {
      let report = queue
        .drain(|m| send_mutation(remote.clone(), m))
        .await?;
      println!("committed: {}", report.committed);
      if let Some(halted) = report.halted {
        println!(
          "halted on mutation {} (attempt {}{}): {}",
          halted.id,
          halted.attempts,
          if halted.exhausted { ", exhausted" } else { "" },
          halted.error
        );
      }
    }

    Command::Watch { interval } => {
      let _spinner = tokio::spawn({
        let mut rx = context.subscribe();
        async move {
          while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() {
              tracing::info!("refresh started");
            } else {
              tracing::info!("refresh finished");
            }
          }
        }
      });

      let _drainer = tokio::spawn({
        let queue = queue.clone();
        let net = net.clone();
        let remote = remote.clone();
        async move {
          run_auto_drain(queue, net.as_ref(), move |m| {
            send_mutation(remote.clone(), m)
          })
          .await;
        }
      });

      loop {
        net.probe(remote.base_url(), Duration::from_secs(3)).await;
        if net.is_connected() {
          report_refresh(context.trigger_refresh().await);
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
      }
    }
  }

  Ok(())
}

async fn send_mutation(
  remote: Arc<HttpRemote>,
  mutation: QueuedMutation,
) -> Result<(), crate::error::RemoteError> {
  remote
    .post_json(&mutation.operation.path, &mutation.operation.body)
    .await
}

fn report_refresh(outcome: RefreshOutcome) {
  match outcome {
    RefreshOutcome::Completed(run) => {
      for (key, outcome) in &run.outcomes {
        println!("  {:<20} {:?}", key, outcome);
      }
      println!(
        "refreshed {} of {} groups",
        run.refreshed(),
        run.outcomes.len()
      );
    }
    RefreshOutcome::SkippedFresh => println!("cache is fresh; nothing to do"),
    RefreshOutcome::SkippedOffline => println!("offline; refresh skipped"),
    RefreshOutcome::AlreadyRunning => println!("joined an in-flight refresh"),
  }
}
