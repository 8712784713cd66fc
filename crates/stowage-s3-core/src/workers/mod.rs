//! Background workers.
//!
//! Each sweep is an `ObjectEngine` method that can be called directly (and
//! is, by the tests); the worker types only schedule them on tokio tasks.

pub mod lifecycle;
pub mod sync;
pub mod trash;
pub mod watcher;

pub use lifecycle::{LifecycleStats, LifecycleWorker};
pub use sync::{SyncStats, SyncWorker};
pub use trash::{TrashSweepStats, TrashWorker};
pub use watcher::FsWatcher;
