//! Filesystem change notifications.
//!
//! [`FsWatcher`] watches the data directory recursively and forwards every
//! changed path that belongs to a bucket tree. The sync worker debounces
//! them into single-bucket reconciliations.

use std::path::PathBuf;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::storage::Layout;

/// A live recursive watch on the data directory. Dropping it stops the
/// watch and closes the change channel.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FsWatcher {
    /// Start watching and return the receiving end of the change channel.
    pub fn start(layout: &Layout) -> StorageResult<(Self, UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Self::start_with(layout, tx)?;
        Ok((watcher, rx))
    }

    /// Start watching, forwarding bucket paths to `tx`.
    pub fn start_with(layout: &Layout, tx: UnboundedSender<PathBuf>) -> StorageResult<Self> {
        let filter = layout.clone();
        // Notifications carry resolved paths; map them back under the
        // configured root so `Layout::bucket_of` recognizes them.
        let resolved_root = std::fs::canonicalize(layout.root())?;
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for path in event.paths {
                        let path = match path.strip_prefix(&resolved_root) {
                            Ok(relative) => filter.root().join(relative),
                            Err(_) => path,
                        };
                        if filter.bucket_of(&path).is_none() {
                            continue;
                        }
                        if tx.send(path).is_err() {
                            debug!("change receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watch error"),
            }
        })
        .map_err(watch_error)?;
        watcher
            .watch(layout.root(), RecursiveMode::Recursive)
            .map_err(watch_error)?;
        info!(root = %layout.root().display(), "watching data directory");
        Ok(Self {
            _watcher: watcher,
            root: layout.root().to_path_buf(),
        })
    }
}

fn watch_error(err: notify::Error) -> StorageError {
    StorageError::Internal(anyhow::Error::new(err).context("failed to watch data directory"))
}
