//! Object change notifications.
//!
//! The engine publishes one [`ObjectEvent`] per completed mutation through
//! an injected [`EventSink`]. Emitting never blocks the caller; delivery to
//! webhooks or queues is the sink owner's concern.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::VersionId;

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectEventKind {
    /// A new version was written.
    ObjectCreated,
    /// A multipart upload was assembled into a version.
    MultipartCompleted,
    /// A version was permanently removed by a caller.
    ObjectRemoved,
    /// A version was moved to the trash.
    ObjectTrashed,
    /// A trashed version was moved back into the live tree.
    ObjectRestored,
    /// A trashed version was purged.
    ObjectPurged,
    /// A version was removed by a lifecycle rule.
    ObjectExpired,
}

impl ObjectEventKind {
    /// S3-style event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectCreated => "s3:ObjectCreated:Put",
            Self::MultipartCompleted => "s3:ObjectCreated:CompleteMultipartUpload",
            Self::ObjectRemoved => "s3:ObjectRemoved:Delete",
            Self::ObjectTrashed => "s3:ObjectRemoved:Trashed",
            Self::ObjectRestored => "s3:ObjectRestore:Completed",
            Self::ObjectPurged => "s3:ObjectRemoved:Purged",
            Self::ObjectExpired => "s3:LifecycleExpiration:Delete",
        }
    }
}

impl std::fmt::Display for ObjectEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single object change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEvent {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Version affected.
    pub version_id: VersionId,
    /// Plaintext size of the version.
    pub size: u64,
    /// Kind of change.
    pub kind: ObjectEventKind,
    /// When the change was committed.
    pub at: DateTime<Utc>,
}

impl ObjectEvent {
    /// An event stamped with the current time.
    #[must_use]
    pub fn now(
        kind: ObjectEventKind,
        bucket: impl Into<String>,
        key: impl Into<String>,
        version_id: VersionId,
        size: u64,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id,
            size,
            kind,
            at: Utc::now(),
        }
    }
}

/// Receiver of object events.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Publish an event. Must not block.
    fn emit(&self, event: ObjectEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: ObjectEvent) {}
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ObjectEvent>,
}

impl ChannelEventSink {
    /// A sink and the receiver that drains it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObjectEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ObjectEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(kind = %e.0.kind, key = %e.0.key, "event receiver closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_should_forward_events_through_channel() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(ObjectEvent::now(
            ObjectEventKind::ObjectCreated,
            "b",
            "k",
            VersionId::NonVersioned,
            3,
        ));
        let event = rx.recv().await.unwrap_or_else(|| panic!("no event"));
        assert_eq!(event.kind, ObjectEventKind::ObjectCreated);
        assert_eq!(event.key, "k");
        assert_eq!(event.size, 3);
    }

    #[test]
    fn test_should_drop_events_after_receiver_closes() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        sink.emit(ObjectEvent::now(
            ObjectEventKind::ObjectPurged,
            "b",
            "k",
            VersionId::Timestamp(1),
            0,
        ));
    }

    #[test]
    fn test_should_name_kinds_like_s3_events() {
        assert_eq!(
            ObjectEventKind::MultipartCompleted.to_string(),
            "s3:ObjectCreated:CompleteMultipartUpload"
        );
    }
}
