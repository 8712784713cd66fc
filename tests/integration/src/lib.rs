//! End-to-end tests for the Stowage object engine.
//!
//! Every test opens a real engine the way the server does: a temporary data
//! directory, a file-backed sqlite index and a channel event sink. Tests
//! that need a restart reopen the same directory.
//!
//! ```text
//! cargo test -p stowage-integration
//! ```

use std::path::Path;
use std::sync::{Arc, Once};

use stowage_s3_core::events::{ChannelEventSink, ObjectEvent, ObjectEventKind};
use stowage_s3_core::index::SqliteIndex;
use stowage_s3_core::state::{PutOptions, PutOutcome, VersionId};
use stowage_s3_core::{EngineConfig, ObjectEngine};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedReceiver;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// An open engine over a data directory it owns.
#[derive(Debug)]
pub struct Harness {
    /// The data directory; removed on drop.
    pub dir: TempDir,
    /// The engine under test.
    pub engine: ObjectEngine,
    /// Events emitted by the engine.
    pub events: UnboundedReceiver<ObjectEvent>,
}

impl Harness {
    /// Open a fresh engine over an empty directory.
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        Self::open(dir).await
    }

    /// Open an engine over an existing directory.
    pub async fn open(dir: TempDir) -> Self {
        init_tracing();
        let config = test_config(dir.path());
        let index = SqliteIndex::open(&config.resolved_index_path())
            .unwrap_or_else(|e| panic!("failed to open index: {e}"));
        let (sink, events) = ChannelEventSink::new();
        let engine = ObjectEngine::open_with(config, Arc::new(index), Arc::new(sink))
            .await
            .unwrap_or_else(|e| panic!("failed to open engine: {e}"));
        Self {
            dir,
            engine,
            events,
        }
    }

    /// Drop the engine and open a new one over the same directory.
    pub async fn restart(self) -> Self {
        let Self { dir, engine, .. } = self;
        drop(engine);
        Self::open(dir).await
    }

    /// Absolute path of `relative` inside the data directory.
    #[must_use]
    pub fn path(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }

    /// Kinds of every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<ObjectEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }
}

/// Engine settings for tests: no listing cache, fast debounce, slow timers.
#[must_use]
pub fn test_config(data_dir: &Path) -> EngineConfig {
    EngineConfig::builder()
        .data_dir(data_dir.display().to_string())
        .listing_cache_ttl_secs(0)
        .sync_debounce_millis(50)
        .sync_interval_secs(3600)
        .build()
}

/// Store `body` at `bucket`/`key` with default options.
pub async fn put(engine: &ObjectEngine, bucket: &str, key: &str, body: &[u8]) -> PutOutcome {
    put_with(engine, bucket, key, body, PutOptions::default()).await
}

/// Store `body` at `bucket`/`key`.
pub async fn put_with(
    engine: &ObjectEngine,
    bucket: &str,
    key: &str,
    mut body: &[u8],
    options: PutOptions,
) -> PutOutcome {
    engine
        .put_object(bucket, key, &mut body, options)
        .await
        .unwrap_or_else(|e| panic!("failed to put {bucket}/{key}: {e}"))
}

/// Read a whole object body.
pub async fn read(
    engine: &ObjectEngine,
    bucket: &str,
    key: &str,
    version: Option<&VersionId>,
) -> Vec<u8> {
    let (mut body, _) = engine
        .get_object(bucket, key, version)
        .await
        .unwrap_or_else(|e| panic!("failed to get {bucket}/{key}: {e}"));
    let mut out = Vec::new();
    body.read_to_end(&mut out)
        .await
        .unwrap_or_else(|e| panic!("failed to read {bucket}/{key}: {e}"));
    out
}

mod test_multipart;
mod test_retention;
mod test_scenarios;
mod test_sync;
mod test_trash;
mod test_versioning;
