//! Listing handlers.
//!
//! `list_objects` builds the unpaged listing for a (prefix, delimiter,
//! search) triple from the index, falling back to a filesystem scan when
//! the index is unavailable, caches it, and pages it by `start_after`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{ListingEntry, ListingKey};
use crate::engine::ObjectEngine;
use crate::error::StorageResult;
use crate::state::object::DEFAULT_MAX_KEYS;
use crate::state::{ListObjectsResult, ListQuery, ObjectSummary, VersionId};
use crate::storage::{PointerState, ScannedObject};

impl ObjectEngine {
    /// List the current objects of a bucket.
    pub async fn list_objects(
        &self,
        bucket: &str,
        query: &ListQuery,
    ) -> StorageResult<ListObjectsResult> {
        self.bucket(bucket)?;
        let cache_key = ListingKey {
            bucket: bucket.to_owned(),
            prefix: query.prefix.clone(),
            delimiter: query.delimiter.clone().filter(|d| !d.is_empty()),
            search: query
                .search
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase),
        };

        let entries = match self.cache.listing(&cache_key) {
            Some(entries) => entries,
            None => {
                let objects = self.current_objects(bucket, &query.prefix).await?;
                let entries = Arc::new(roll_up(objects, &cache_key));
                self.cache
                    .store_listing(cache_key.clone(), Arc::clone(&entries));
                entries
            }
        };
        Ok(page(&entries, query))
    }

    /// Latest live version of every key under `prefix`, sorted by key.
    async fn current_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        match self.index.list_latest(bucket, prefix) {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|r| ObjectSummary {
                    key: r.key,
                    version_id: r.version_id,
                    size: r.size,
                    last_modified: r.last_modified,
                    etag: r.etag,
                })
                .collect()),
            Err(e) => {
                debug!(bucket, error = %e, "listing from filesystem scan");
                let scan = self.store.scan_bucket(bucket).await?;
                Ok(scan
                    .objects
                    .iter()
                    .filter(|o| o.key.starts_with(prefix))
                    .filter_map(scanned_latest)
                    .collect())
            }
        }
    }
}

/// The version a scanned object's unversioned reads resolve to.
pub(crate) fn scanned_latest_id(object: &ScannedObject) -> Option<VersionId> {
    let has = |v: &VersionId| object.versions.iter().any(|s| s.version_id == *v);
    if let PointerState::Valid(v) = object.pointer {
        if has(&v) {
            return Some(v);
        }
    }
    if object.pointer == PointerState::Absent && has(&VersionId::NonVersioned) {
        return Some(VersionId::NonVersioned);
    }
    object.versions.first().map(|s| s.version_id)
}

fn scanned_latest(object: &ScannedObject) -> Option<ObjectSummary> {
    let latest = scanned_latest_id(object)?;
    let stat = object.versions.iter().find(|s| s.version_id == latest)?;
    Some(ObjectSummary {
        key: object.key.clone(),
        version_id: stat.version_id,
        size: stat.size,
        last_modified: stat.last_modified,
        etag: None,
    })
}

/// Apply search and delimiter roll-up to a sorted object list.
fn roll_up(objects: Vec<ObjectSummary>, key: &ListingKey) -> Vec<ListingEntry> {
    let mut entries: BTreeMap<String, ListingEntry> = BTreeMap::new();
    for object in objects {
        if let Some(search) = &key.search {
            if !object.key.to_lowercase().contains(search) {
                continue;
            }
        }
        let Some(rest) = object.key.strip_prefix(&key.prefix) else {
            continue;
        };
        if let Some(delimiter) = &key.delimiter {
            if let Some(pos) = rest.find(delimiter.as_str()) {
                let common = format!("{}{}", key.prefix, &rest[..pos + delimiter.len()]);
                entries
                    .entry(common.clone())
                    .or_insert(ListingEntry::Prefix(common));
                continue;
            }
        }
        entries.insert(object.key.clone(), ListingEntry::Object(object));
    }
    entries.into_values().collect()
}

fn page(entries: &[ListingEntry], query: &ListQuery) -> ListObjectsResult {
    let max_keys = if query.max_keys == 0 {
        DEFAULT_MAX_KEYS
    } else {
        query.max_keys
    };
    let start = match &query.start_after {
        Some(after) => entries.partition_point(|e| e.sort_key() <= after.as_str()),
        None => 0,
    };
    let remaining = &entries[start..];
    let taken = &remaining[..remaining.len().min(max_keys)];
    let is_truncated = remaining.len() > taken.len();

    let mut result = ListObjectsResult {
        is_truncated,
        next_start_after: if is_truncated {
            taken.last().map(|e| e.sort_key().to_owned())
        } else {
            None
        },
        ..ListObjectsResult::default()
    };
    for entry in taken {
        match entry {
            ListingEntry::Object(o) => result.objects.push(o.clone()),
            ListingEntry::Prefix(p) => result.common_prefixes.push(p.clone()),
        }
    }
    result
}
