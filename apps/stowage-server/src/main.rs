//! Stowage server - filesystem-backed object storage daemon.
//!
//! Opens the object engine over the configured data directory and runs its
//! background workers: periodic and change-driven reconciliation, trash
//! retention and lifecycle expiration. Object events are written to the log.
//!
//! # Usage
//!
//! ```text
//! STOWAGE_DATA_DIR=/srv/stowage stowage-server
//! stowage-server --sync-once     # reconcile once, print stats, exit
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `STOWAGE_DATA_DIR` | `./data` | Root of the bucket trees |
//! | `STOWAGE_INDEX_PATH` | `<data_dir>/.stowage/index.db` | Sqlite index |
//! | `STOWAGE_WATCH_FS` | `true` | Reconcile on filesystem changes |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::sync::Arc;

use anyhow::{Context, Result};
use stowage_s3_core::events::{ChannelEventSink, ObjectEvent};
use stowage_s3_core::index::SqliteIndex;
use stowage_s3_core::workers::{FsWatcher, LifecycleWorker, SyncWorker, TrashWorker};
use stowage_s3_core::{EngineConfig, ObjectEngine};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Log every object event until the engine is dropped.
async fn drain_events(mut events: UnboundedReceiver<ObjectEvent>) {
    while let Some(event) = events.recv().await {
        info!(
            kind = %event.kind,
            bucket = %event.bucket,
            key = %event.key,
            version = %event.version_id,
            size = event.size,
            at = %event.at,
            "object event"
        );
    }
}

async fn open_engine(config: EngineConfig) -> Result<(ObjectEngine, UnboundedReceiver<ObjectEvent>)> {
    let index_path = config.resolved_index_path();
    let index = SqliteIndex::open(&index_path)
        .with_context(|| format!("failed to open index at {}", index_path.display()))?;
    let (sink, events) = ChannelEventSink::new();
    let engine = ObjectEngine::open_with(config, Arc::new(index), Arc::new(sink))
        .await
        .context("failed to open object engine")?;
    Ok((engine, events))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env();
    init_tracing(&config.log_level)?;

    info!(
        data_dir = %config.data_dir,
        index = %config.resolved_index_path().display(),
        sync_interval_secs = config.sync_interval_secs,
        watch_filesystem = config.watch_filesystem,
        version = VERSION,
        "starting Stowage server",
    );

    let watch = config.watch_filesystem;
    let (engine, events) = open_engine(config).await?;

    if std::env::args().any(|a| a == "--sync-once") {
        let stats = engine.reconcile_all().await.context("sync failed")?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let events_task = tokio::spawn(drain_events(events));

    let mut sync = SyncWorker::new(engine.clone());
    let watcher = if watch {
        match FsWatcher::start(engine.layout()) {
            Ok((watcher, changes)) => {
                sync = sync.with_changes(changes);
                Some(watcher)
            }
            Err(e) => {
                warn!(error = %e, "filesystem watch unavailable, relying on periodic sync");
                None
            }
        }
    } else {
        None
    };

    let workers = [
        sync.spawn(),
        TrashWorker::new(engine.clone()).spawn(),
        LifecycleWorker::new(engine.clone()).spawn(),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal, stopping workers");

    drop(watcher);
    for worker in &workers {
        worker.abort();
    }
    for worker in workers {
        let _ = worker.await;
    }
    drop(engine);
    events_task.abort();
    info!("stopped");

    Ok(())
}
