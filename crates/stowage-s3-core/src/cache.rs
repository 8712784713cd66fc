//! Listing cache.
//!
//! Caches the bucket list and unpaged object listings. Entries are keyed by
//! everything that changes the set of results (bucket, prefix, delimiter,
//! search); paging is applied by the caller on every request. Every
//! mutating engine call invalidates the affected bucket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::state::{BucketSummary, ObjectSummary};

/// One entry of an unpaged listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingEntry {
    /// A current object.
    Object(ObjectSummary),
    /// Keys rolled up under a delimiter.
    Prefix(String),
}

impl ListingEntry {
    /// Key the entry sorts and pages by.
    #[must_use]
    pub fn sort_key(&self) -> &str {
        match self {
            Self::Object(o) => &o.key,
            Self::Prefix(p) => p,
        }
    }
}

/// Cache key of an unpaged listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    /// Bucket name.
    pub bucket: String,
    /// Key prefix.
    pub prefix: String,
    /// Delimiter, if any.
    pub delimiter: Option<String>,
    /// Lowercased search filter, if any.
    pub search: Option<String>,
}

/// Cache over listing results.
pub trait ListingCache: Send + Sync + std::fmt::Debug {
    /// Cached bucket list.
    fn buckets(&self) -> Option<Vec<BucketSummary>>;
    /// Store the bucket list.
    fn store_buckets(&self, buckets: Vec<BucketSummary>);
    /// Forget the bucket list.
    fn invalidate_buckets(&self);
    /// Cached listing.
    fn listing(&self, key: &ListingKey) -> Option<Arc<Vec<ListingEntry>>>;
    /// Store a listing.
    fn store_listing(&self, key: ListingKey, entries: Arc<Vec<ListingEntry>>);
    /// Forget every listing of a bucket.
    fn invalidate_bucket(&self, bucket: &str);
}

/// A cache that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListingCache;

impl ListingCache for NoopListingCache {
    fn buckets(&self) -> Option<Vec<BucketSummary>> {
        None
    }

    fn store_buckets(&self, _buckets: Vec<BucketSummary>) {}

    fn invalidate_buckets(&self) {}

    fn listing(&self, _key: &ListingKey) -> Option<Arc<Vec<ListingEntry>>> {
        None
    }

    fn store_listing(&self, _key: ListingKey, _entries: Arc<Vec<ListingEntry>>) {}

    fn invalidate_bucket(&self, _bucket: &str) {}
}

/// In-process cache with a fixed time-to-live.
pub struct MemoryListingCache {
    ttl: Duration,
    buckets: Mutex<Option<(Instant, Vec<BucketSummary>)>>,
    listings: DashMap<ListingKey, (Instant, Arc<Vec<ListingEntry>>)>,
}

impl std::fmt::Debug for MemoryListingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryListingCache")
            .field("ttl", &self.ttl)
            .field("listings", &self.listings.len())
            .finish_non_exhaustive()
    }
}

impl MemoryListingCache {
    /// A cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            buckets: Mutex::new(None),
            listings: DashMap::new(),
        }
    }

    fn fresh(&self, stored: Instant) -> bool {
        stored.elapsed() < self.ttl
    }
}

impl ListingCache for MemoryListingCache {
    fn buckets(&self) -> Option<Vec<BucketSummary>> {
        let guard = self.buckets.lock();
        match guard.as_ref() {
            Some((stored, buckets)) if self.fresh(*stored) => Some(buckets.clone()),
            _ => None,
        }
    }

    fn store_buckets(&self, buckets: Vec<BucketSummary>) {
        *self.buckets.lock() = Some((Instant::now(), buckets));
    }

    fn invalidate_buckets(&self) {
        *self.buckets.lock() = None;
    }

    fn listing(&self, key: &ListingKey) -> Option<Arc<Vec<ListingEntry>>> {
        let entry = self.listings.get(key)?;
        let (stored, entries) = entry.value();
        if self.fresh(*stored) {
            return Some(Arc::clone(entries));
        }
        drop(entry);
        self.listings.remove(key);
        None
    }

    fn store_listing(&self, key: ListingKey, entries: Arc<Vec<ListingEntry>>) {
        self.listings.insert(key, (Instant::now(), entries));
    }

    fn invalidate_bucket(&self, bucket: &str) {
        self.listings.retain(|k, _| k.bucket != bucket);
    }
}
