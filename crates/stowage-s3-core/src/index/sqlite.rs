//! SQLite-backed [`MetadataIndex`].
//!
//! A single connection in WAL mode behind a `parking_lot::Mutex`. Timestamps
//! are stored as fixed-width RFC 3339 strings with nanosecond precision, so
//! lexicographic comparison in SQL matches chronological order.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use tracing::debug;

use crate::error::StorageResult;
use crate::state::{
    BucketConfig, EncryptionAlgorithm, LockMode, MultipartUpload, PartRecord, Retention,
    VersionId, VersionRecord,
};

use super::{MetadataIndex, UsageCounters};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    config TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS objects (
    bucket TEXT NOT NULL,
    key TEXT NOT NULL,
    version_id TEXT NOT NULL,
    size INTEGER NOT NULL,
    last_modified TEXT NOT NULL,
    etag TEXT,
    encryption TEXT,
    is_latest INTEGER NOT NULL DEFAULT 0,
    retain_until TEXT,
    lock_mode TEXT,
    legal_hold INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    tags TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (bucket, key, version_id)
);
CREATE INDEX IF NOT EXISTS idx_objects_latest ON objects(bucket, is_latest, deleted_at);
CREATE INDEX IF NOT EXISTS idx_objects_deleted ON objects(deleted_at);
CREATE TABLE IF NOT EXISTS multipart_uploads (
    upload_id TEXT PRIMARY KEY,
    bucket TEXT NOT NULL,
    key TEXT NOT NULL,
    encryption TEXT,
    initiated TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS multipart_parts (
    upload_id TEXT NOT NULL,
    part_number INTEGER NOT NULL,
    size INTEGER NOT NULL,
    etag TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    PRIMARY KEY (upload_id, part_number)
);
";

const VERSION_COLUMNS: &str = "bucket, key, version_id, size, last_modified, etag, encryption, \
     is_latest, retain_until, lock_mode, legal_hold, deleted_at, tags";

/// Metadata index stored in a sqlite database file.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex").finish_non_exhaustive()
    }
}

impl SqliteIndex {
    /// Open (creating if needed) the index at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!(path = %path.display(), "opened metadata index");
        Self::with_connection(conn)
    }

    /// An index that lives only in memory.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Write every column of `record` with the given insert verb and
    /// conflict clause. Returns the number of rows written.
    fn write_record(
        &self,
        verb: &str,
        conflict: &str,
        record: &VersionRecord,
    ) -> StorageResult<usize> {
        let tags = serde_json::to_string(&record.tags)?;
        let retention = record.lock.retention;
        let written = self.conn.lock().execute(
            &format!(
                "{verb} INTO objects ({VERSION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13){conflict}"
            ),
            params![
                record.bucket,
                record.key,
                record.version_id.token(),
                to_i64(record.size),
                ts(&record.last_modified),
                record.etag,
                record.encryption.map(|e| e.as_str()),
                record.is_latest,
                retention.map(|r| ts(&r.retain_until)),
                retention.map(|r| r.mode.as_str()),
                record.lock.legal_hold,
                record.deleted_at.as_ref().map(ts),
                tags,
            ],
        )?;
        Ok(written)
    }

    fn query_records<P: Params>(&self, sql: &str, params: P) -> StorageResult<Vec<VersionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_record)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn ts(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<VersionRecord> {
    let version_id = row
        .get::<_, String>(2)?
        .parse::<VersionId>()
        .map_err(|e| conversion(2, e))?;
    let retain_until = row
        .get::<_, Option<String>>(8)?
        .map(|s| parse_ts(8, &s))
        .transpose()?;
    let lock_mode = row
        .get::<_, Option<String>>(9)?
        .map(|s| s.parse::<LockMode>().map_err(|e| conversion(9, e)))
        .transpose()?;
    let deleted_at = row
        .get::<_, Option<String>>(11)?
        .map(|s| parse_ts(11, &s))
        .transpose()?;
    let tags = serde_json::from_str(&row.get::<_, String>(12)?).map_err(|e| conversion(12, e))?;

    Ok(VersionRecord {
        bucket: row.get(0)?,
        key: row.get(1)?,
        version_id,
        size: to_u64(row.get(3)?),
        last_modified: parse_ts(4, &row.get::<_, String>(4)?)?,
        etag: row.get(5)?,
        encryption: row
            .get::<_, Option<String>>(6)?
            .as_deref()
            .and_then(EncryptionAlgorithm::from_tag),
        is_latest: row.get(7)?,
        lock: crate::state::LockState {
            legal_hold: row.get(10)?,
            retention: match (lock_mode, retain_until) {
                (Some(mode), Some(retain_until)) => Some(Retention { mode, retain_until }),
                _ => None,
            },
        },
        deleted_at,
        tags,
    })
}

fn row_to_upload(row: &Row<'_>) -> rusqlite::Result<MultipartUpload> {
    Ok(MultipartUpload {
        upload_id: row.get(0)?,
        bucket: row.get(1)?,
        key: row.get(2)?,
        encryption: row
            .get::<_, Option<String>>(3)?
            .as_deref()
            .and_then(EncryptionAlgorithm::from_tag),
        initiated: parse_ts(4, &row.get::<_, String>(4)?)?,
    })
}

// ---------------------------------------------------------------------------
// MetadataIndex
// ---------------------------------------------------------------------------

impl MetadataIndex for SqliteIndex {
    fn upsert_bucket(&self, config: &BucketConfig) -> StorageResult<()> {
        let json = serde_json::to_string(config)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO buckets (name, created_at, config) VALUES (?1, ?2, ?3)",
            params![config.name, ts(&config.created_at), json],
        )?;
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM objects WHERE bucket = ?1", params![bucket])?;
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id IN \
             (SELECT upload_id FROM multipart_uploads WHERE bucket = ?1)",
            params![bucket],
        )?;
        tx.execute(
            "DELETE FROM multipart_uploads WHERE bucket = ?1",
            params![bucket],
        )?;
        tx.execute("DELETE FROM buckets WHERE name = ?1", params![bucket])?;
        tx.commit()?;
        Ok(())
    }

    fn load_buckets(&self) -> StorageResult<Vec<BucketConfig>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT config FROM buckets ORDER BY name")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut configs = Vec::with_capacity(raw.len());
        for json in raw {
            configs.push(serde_json::from_str(&json)?);
        }
        Ok(configs)
    }

    fn upsert_version(&self, record: &VersionRecord) -> StorageResult<()> {
        self.write_record("INSERT OR REPLACE", "", record)?;
        Ok(())
    }

    fn insert_version_if_absent(&self, record: &VersionRecord) -> StorageResult<bool> {
        let inserted = self.write_record(
            "INSERT",
            " ON CONFLICT (bucket, key, version_id) DO NOTHING",
            record,
        )?;
        Ok(inserted > 0)
    }

    fn correct_version_stat(&self, observed: &VersionRecord) -> StorageResult<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE objects SET size = ?4, encryption = ?5, last_modified = ?6, etag = NULL \
             WHERE bucket = ?1 AND key = ?2 AND version_id = ?3 \
             AND (size <> ?4 OR encryption IS NOT ?5)",
            params![
                observed.bucket,
                observed.key,
                observed.version_id.token(),
                to_i64(observed.size),
                observed.encryption.map(|e| e.as_str()),
                ts(&observed.last_modified),
            ],
        )?;
        Ok(changed > 0)
    }

    fn rekey_version(
        &self,
        bucket: &str,
        key: &str,
        from: &VersionId,
        to: &VersionId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<bool> {
        let moved = self.conn.lock().execute(
            "UPDATE OR REPLACE objects SET version_id = ?4, deleted_at = ?5, is_latest = 0 \
             WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
            params![
                bucket,
                key,
                from.token(),
                to.token(),
                deleted_at.as_ref().map(ts)
            ],
        )?;
        Ok(moved > 0)
    }

    fn get_version(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
    ) -> StorageResult<Option<VersionRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM objects \
                     WHERE bucket = ?1 AND key = ?2 AND version_id = ?3"
                ),
                params![bucket, key, version.token()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_version(&self, bucket: &str, key: &str, version: &VersionId) -> StorageResult<()> {
        self.conn.lock().execute(
            "DELETE FROM objects WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
            params![bucket, key, version.token()],
        )?;
        Ok(())
    }

    fn versions_of(&self, bucket: &str, key: &str) -> StorageResult<Vec<VersionRecord>> {
        self.query_records(
            &format!("SELECT {VERSION_COLUMNS} FROM objects WHERE bucket = ?1 AND key = ?2"),
            params![bucket, key],
        )
    }

    fn bucket_versions(&self, bucket: &str) -> StorageResult<Vec<VersionRecord>> {
        self.query_records(
            &format!("SELECT {VERSION_COLUMNS} FROM objects WHERE bucket = ?1 ORDER BY key"),
            params![bucket],
        )
    }

    fn set_latest(&self, bucket: &str, key: &str, latest: Option<&VersionId>) -> StorageResult<()> {
        self.conn.lock().execute(
            "UPDATE objects SET is_latest = \
             CASE WHEN version_id = ?3 AND deleted_at IS NULL THEN 1 ELSE 0 END \
             WHERE bucket = ?1 AND key = ?2",
            params![bucket, key, latest.map(VersionId::token)],
        )?;
        Ok(())
    }

    fn mark_deleted(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
        deleted_at: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        self.conn.lock().execute(
            "UPDATE objects SET deleted_at = ?4, \
             is_latest = CASE WHEN ?4 IS NULL THEN is_latest ELSE 0 END \
             WHERE bucket = ?1 AND key = ?2 AND version_id = ?3",
            params![bucket, key, version.token(), deleted_at.as_ref().map(ts)],
        )?;
        Ok(())
    }

    fn list_latest(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<VersionRecord>> {
        self.query_records(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM objects \
                 WHERE bucket = ?1 AND is_latest = 1 AND deleted_at IS NULL \
                 AND substr(key, 1, length(?2)) = ?2 ORDER BY key"
            ),
            params![bucket, prefix],
        )
    }

    fn list_trashed(&self, bucket: Option<&str>) -> StorageResult<Vec<VersionRecord>> {
        self.query_records(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM objects \
                 WHERE deleted_at IS NOT NULL AND (?1 IS NULL OR bucket = ?1) \
                 ORDER BY bucket, key, deleted_at"
            ),
            params![bucket],
        )
    }

    fn live_versions_older_than(
        &self,
        bucket: &str,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<VersionRecord>> {
        self.query_records(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM objects \
                 WHERE bucket = ?1 AND deleted_at IS NULL AND version_id <> 'folder' \
                 AND substr(key, 1, length(?2)) = ?2 AND last_modified < ?3 \
                 ORDER BY key, last_modified"
            ),
            params![bucket, prefix, ts(&cutoff)],
        )
    }

    fn usage(&self, bucket: Option<&str>) -> StorageResult<UsageCounters> {
        let conn = self.conn.lock();
        let counters = conn.query_row(
            "SELECT \
               COALESCE(SUM(CASE WHEN deleted_at IS NULL AND is_latest = 1 \
                                  AND version_id <> 'folder' THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN deleted_at IS NULL AND version_id <> 'folder' \
                                  THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN size ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN size ELSE 0 END), 0) \
             FROM objects WHERE (?1 IS NULL OR bucket = ?1)",
            params![bucket],
            |row| {
                Ok(UsageCounters {
                    objects: to_u64(row.get(0)?),
                    versions: to_u64(row.get(1)?),
                    bytes: to_u64(row.get(2)?),
                    trashed_versions: to_u64(row.get(3)?),
                    trashed_bytes: to_u64(row.get(4)?),
                })
            },
        )?;
        Ok(counters)
    }

    fn insert_upload(&self, upload: &MultipartUpload) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO multipart_uploads (upload_id, bucket, key, encryption, initiated) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                upload.upload_id,
                upload.bucket,
                upload.key,
                upload.encryption.map(|e| e.as_str()),
                ts(&upload.initiated),
            ],
        )?;
        Ok(())
    }

    fn get_upload(&self, upload_id: &str) -> StorageResult<Option<MultipartUpload>> {
        let conn = self.conn.lock();
        let upload = conn
            .query_row(
                "SELECT upload_id, bucket, key, encryption, initiated \
                 FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
                row_to_upload,
            )
            .optional()?;
        Ok(upload)
    }

    fn delete_upload(&self, upload_id: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn record_part(&self, upload_id: &str, part: &PartRecord) -> StorageResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO multipart_parts (upload_id, part_number, size, etag, last_modified) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                upload_id,
                part.part_number,
                to_i64(part.size),
                part.etag,
                ts(&part.last_modified),
            ],
        )?;
        Ok(())
    }

    fn list_parts(&self, upload_id: &str) -> StorageResult<Vec<PartRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT part_number, size, etag, last_modified FROM multipart_parts \
             WHERE upload_id = ?1 ORDER BY part_number",
        )?;
        let parts = stmt
            .query_map(params![upload_id], |row| {
                Ok(PartRecord {
                    part_number: row.get(0)?,
                    size: to_u64(row.get(1)?),
                    etag: row.get(2)?,
                    last_modified: parse_ts(3, &row.get::<_, String>(3)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(parts)
    }

    fn list_uploads(&self, bucket: &str) -> StorageResult<Vec<MultipartUpload>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT upload_id, bucket, key, encryption, initiated FROM multipart_uploads \
             WHERE bucket = ?1 ORDER BY initiated, upload_id",
        )?;
        let uploads = stmt
            .query_map(params![bucket], row_to_upload)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(uploads)
    }
}
