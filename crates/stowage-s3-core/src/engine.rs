//! The object storage engine.
//!
//! [`ObjectEngine`] owns the version store, the trash mirror, multipart
//! staging, the metadata index and the listing cache. Operations are
//! implemented in the [`crate::ops`] submodules and the background sweeps
//! in [`crate::workers`], all as `impl ObjectEngine` blocks.
//!
//! Every mutation follows the same order: filesystem commit, index update,
//! cache invalidation, event. Index failures after a filesystem commit are
//! logged and left for the next sync sweep.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{ListingCache, MemoryListingCache, NoopListingCache};
use crate::config::EngineConfig;
use crate::error::{StorageError, StorageResult};
use crate::events::{EventSink, NoopEventSink, ObjectEvent, ObjectEventKind};
use crate::index::{MetadataIndex, SqliteIndex};
use crate::multipart::UploadStaging;
use crate::state::{BucketConfig, BucketRegistry, LockState, VersionId};
use crate::storage::{Layout, MasterKey, VersionStore};
use crate::trash::TrashStore;

/// Filesystem-backed object storage engine.
///
/// All fields are `Arc`-wrapped; clones share state.
///
/// # Examples
///
/// ```
/// use stowage_s3_core::state::{CreateBucketOptions, PutOptions};
/// use stowage_s3_core::{EngineConfig, ObjectEngine};
///
/// # tokio_test::block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let config = EngineConfig::builder()
///     .data_dir(dir.path().display().to_string())
///     .build();
/// let engine = ObjectEngine::open(config).await.unwrap();
/// engine
///     .create_bucket("photos", CreateBucketOptions::default())
///     .await
///     .unwrap();
///
/// let mut body: &[u8] = b"hello";
/// let put = engine
///     .put_object("photos", "hello.txt", &mut body, PutOptions::default())
///     .await
///     .unwrap();
/// assert_eq!(put.size, 5);
/// assert!(dir.path().join("photos/hello.txt/simple").is_file());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ObjectEngine {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) store: Arc<VersionStore>,
    pub(crate) trash: Arc<TrashStore>,
    pub(crate) staging: Arc<UploadStaging>,
    pub(crate) index: Arc<dyn MetadataIndex>,
    pub(crate) buckets: Arc<BucketRegistry>,
    pub(crate) cache: Arc<dyn ListingCache>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl ObjectEngine {
    /// Open an engine with the sqlite index at the configured path and no
    /// event sink.
    pub async fn open(config: EngineConfig) -> StorageResult<Self> {
        let index = SqliteIndex::open(&config.resolved_index_path())?;
        Self::open_with(config, Arc::new(index), Arc::new(NoopEventSink)).await
    }

    /// Open an engine over an injected index and event sink.
    ///
    /// Creates the data directory, loads (or generates) the master key and
    /// loads bucket settings from the index. When the index cannot be read,
    /// bucket directories on disk are registered with default settings.
    pub async fn open_with(
        config: EngineConfig,
        index: Arc<dyn MetadataIndex>,
        events: Arc<dyn EventSink>,
    ) -> StorageResult<Self> {
        let layout = Layout::new(config.data_path());
        tokio::fs::create_dir_all(layout.system_dir()).await?;
        let key =
            MasterKey::load_or_create(&layout.master_key_path(), config.encryption_key.as_deref())
                .await?;
        let store = VersionStore::new(layout.clone(), key);
        store.prepare().await?;

        let cache: Arc<dyn ListingCache> = match config.listing_cache_ttl() {
            Some(ttl) => Arc::new(MemoryListingCache::new(ttl)),
            None => Arc::new(NoopListingCache),
        };

        let buckets = BucketRegistry::new();
        match index.load_buckets() {
            Ok(configs) => buckets.load(configs),
            Err(e) => {
                warn!(error = %e, "metadata index unavailable, registering buckets from disk");
                buckets.load(
                    store
                        .list_bucket_dirs()
                        .await?
                        .into_iter()
                        .map(BucketConfig::new),
                );
            }
        }

        info!(
            data_dir = %layout.root().display(),
            buckets = buckets.names().len(),
            "object engine opened"
        );

        Ok(Self {
            config: Arc::new(config),
            trash: Arc::new(TrashStore::new(layout.clone())),
            staging: Arc::new(UploadStaging::new(layout)),
            store: Arc::new(store),
            index,
            buckets: Arc::new(buckets),
            cache,
            events,
        })
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Directory layout of the data root.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        self.store.layout()
    }

    /// The metadata index.
    #[must_use]
    pub fn index(&self) -> &Arc<dyn MetadataIndex> {
        &self.index
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Settings of an existing bucket.
    pub(crate) fn bucket(&self, name: &str) -> StorageResult<BucketConfig> {
        self.buckets.get(name)
    }

    /// Lock state of a version, failing closed when the index is unreadable.
    ///
    /// A version without an index row carries no lock.
    pub(crate) fn lock_state(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
    ) -> StorageResult<LockState> {
        Ok(self
            .index
            .get_version(bucket, key, version)?
            .map(|r| r.lock)
            .unwrap_or_default())
    }

    /// Log an index failure that the next sync sweep will repair.
    pub(crate) fn defer_index<T>(&self, result: StorageResult<T>, bucket: &str, key: &str) {
        if let Err(e) = result {
            warn!(bucket, key, error = %e, "index update deferred to next sync");
        }
    }

    /// Re-resolve the latest version on disk and flag it in the index.
    pub(crate) async fn refresh_latest(&self, bucket: &str, key: &str) -> Option<VersionId> {
        let latest = match self.store.resolve_latest(bucket, key).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(bucket, key, error = %e, "failed to resolve latest version");
                return None;
            }
        };
        self.defer_index(
            self.index.set_latest(bucket, key, latest.as_ref()),
            bucket,
            key,
        );
        latest
    }

    /// Remove empty directories left behind by a removal.
    pub(crate) async fn prune_key_dirs(&self, bucket: &str, key: &str) {
        let index = Arc::clone(&self.index);
        let bucket_owned = bucket.to_owned();
        self.store
            .prune_empty_dirs(bucket, key, move |folder| {
                matches!(
                    index.get_version(&bucket_owned, folder, &VersionId::FolderPlaceholder),
                    Ok(Some(record)) if !record.is_trashed()
                )
            })
            .await;
    }

    /// Drop cached listings of a bucket.
    pub(crate) fn invalidate(&self, bucket: &str) {
        self.cache.invalidate_bucket(bucket);
    }

    /// Publish an object event.
    pub(crate) fn emit(
        &self,
        kind: ObjectEventKind,
        bucket: &str,
        key: &str,
        version_id: VersionId,
        size: u64,
    ) {
        debug!(%kind, bucket, key, version = %version_id, "object event");
        self.events
            .emit(ObjectEvent::now(kind, bucket, key, version_id, size));
    }
}

/// Map a missing resolved version to the caller-facing not-found error.
pub(crate) fn missing_object(key: &str, version: Option<&VersionId>) -> StorageError {
    match version {
        Some(v) => StorageError::NoSuchVersion {
            key: key.to_owned(),
            version_id: v.token(),
        },
        None => StorageError::NoSuchKey {
            key: key.to_owned(),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::events::ChannelEventSink;
    use crate::state::CreateBucketOptions;

    /// An engine over a temp directory with an in-memory index.
    pub(crate) async fn engine() -> (TempDir, ObjectEngine) {
        let (dir, engine, _) = engine_with_events().await;
        (dir, engine)
    }

    pub(crate) async fn engine_with_events() -> (
        TempDir,
        ObjectEngine,
        tokio::sync::mpsc::UnboundedReceiver<ObjectEvent>,
    ) {
        let index = SqliteIndex::open_in_memory().unwrap_or_else(|e| panic!("index: {e}"));
        let (sink, rx) = ChannelEventSink::new();
        let (dir, engine) = engine_over(Arc::new(index), Arc::new(sink)).await;
        (dir, engine, rx)
    }

    /// An engine over a temp directory with the given index.
    pub(crate) async fn engine_with_index(
        index: Arc<dyn MetadataIndex>,
    ) -> (TempDir, ObjectEngine) {
        engine_over(index, Arc::new(NoopEventSink)).await
    }

    async fn engine_over(
        index: Arc<dyn MetadataIndex>,
        events: Arc<dyn EventSink>,
    ) -> (TempDir, ObjectEngine) {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let config = EngineConfig::builder()
            .data_dir(dir.path().display().to_string())
            .listing_cache_ttl_secs(0)
            .build();
        let engine = ObjectEngine::open_with(config, index, events)
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));
        (dir, engine)
    }

    pub(crate) async fn engine_with_bucket(
        name: &str,
        options: CreateBucketOptions,
    ) -> (TempDir, ObjectEngine) {
        let (dir, engine) = engine().await;
        engine
            .create_bucket(name, options)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        (dir, engine)
    }

    #[tokio::test]
    async fn test_should_open_and_prepare_layout() {
        let (dir, engine) = engine().await;
        assert!(dir.path().join(".stowage/tmp").is_dir());
        assert!(dir.path().join(".stowage/master.key").is_file());
        assert!(dir.path().join(".trash").is_dir());
        assert!(engine.list_buckets().is_empty());
    }

    #[tokio::test]
    async fn test_should_reload_buckets_from_index() {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let config = EngineConfig::builder()
            .data_dir(dir.path().display().to_string())
            .build();
        let engine = ObjectEngine::open(config.clone())
            .await
            .unwrap_or_else(|e| panic!("open: {e}"));
        engine
            .create_bucket(
                "photos",
                CreateBucketOptions {
                    versioning: true,
                    object_lock: false,
                },
            )
            .await
            .unwrap_or_else(|e| panic!("create: {e}"));
        drop(engine);

        let reopened = ObjectEngine::open(config)
            .await
            .unwrap_or_else(|e| panic!("reopen: {e}"));
        let bucket = reopened
            .get_bucket_config("photos")
            .unwrap_or_else(|e| panic!("config: {e}"));
        assert!(bucket.versioning_enabled);
    }
}
