//! Filesystem version store.
//!
//! [`VersionStore`] owns the physical bytes of every live version. Writes
//! stream through a fixed buffer into a temp file under the system
//! directory, are fsynced, and only then renamed into place; the `.latest`
//! pointer is rewritten last, so a reader never resolves to a partial
//! version.
//!
//! Concurrent writers to one key race on the pointer: the last pointer
//! rename wins. Every version both writers produced stays on disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::checksums::StreamingMd5;
use crate::error::{StorageError, StorageResult};
use crate::state::{EncryptionAlgorithm, VersionId};
use crate::utils::{system_time_to_nanos, system_time_to_utc, temp_file_name};
use crate::validation::is_folder_key;

use super::crypto::{self, ChunkedEncryptor, MasterKey};
use super::layout::{Layout, POINTER_FILE, is_reserved_name};

/// Buffer size used for every streaming copy.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Object body stream handed to callers.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// Physical facts about one stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStat {
    /// Version identifier.
    pub version_id: VersionId,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Filesystem modification time.
    pub last_modified: DateTime<Utc>,
    /// Encryption detected from the file header.
    pub encryption: Option<EncryptionAlgorithm>,
}

/// Contents of a key's pointer file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerState {
    /// No pointer file.
    Absent,
    /// The pointer names this version.
    Valid(VersionId),
    /// The pointer exists but its contents do not parse.
    Invalid,
}

/// What [`VersionStore::repair_pointer`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerRepair {
    /// The pointer already named an existing version.
    Intact,
    /// The key has no timestamped versions and no pointer.
    NotVersioned,
    /// The pointer was (re)written to the newest remaining version.
    Promoted(VersionId),
    /// No versions remain; the pointer was deleted.
    Removed,
}

/// One object found by a bucket scan.
#[derive(Debug, Clone)]
pub struct ScannedObject {
    /// Object key.
    pub key: String,
    /// Pointer state of the key directory.
    pub pointer: PointerState,
    /// Versions on disk, newest first.
    pub versions: Vec<VersionStat>,
}

/// Result of walking one bucket directory.
#[derive(Debug, Clone, Default)]
pub struct BucketScan {
    /// Every object discovered.
    pub objects: Vec<ScannedObject>,
    /// Per-path failures that were skipped.
    pub errors: Vec<String>,
}

/// A version that was just made durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedVersion {
    /// Stat of the new version.
    pub stat: VersionStat,
    /// MD5 hex of the plaintext.
    pub etag: String,
    /// New identifier of a legacy flat file migrated into the key directory.
    pub migrated_legacy: Option<VersionId>,
}

fn sort_stats_newest_first(stats: &mut [VersionStat]) {
    stats.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.version_id.cmp(&a.version_id))
    });
}

fn not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Filesystem store for bucket trees.
#[derive(Debug, Clone)]
pub struct VersionStore {
    layout: Layout,
    key: MasterKey,
}

impl VersionStore {
    /// Create a store over `layout`, sealing encrypted versions with `key`.
    #[must_use]
    pub fn new(layout: Layout, key: MasterKey) -> Self {
        Self { layout, key }
    }

    /// Path arithmetic for this store.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Create the data root and the engine-private directories.
    pub async fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.layout.root()).await?;
        fs::create_dir_all(self.layout.tmp_dir()).await?;
        fs::create_dir_all(self.layout.trash_root()).await?;
        fs::create_dir_all(self.layout.uploads_dir()).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// Create a bucket directory.
    pub async fn create_bucket_dir(&self, bucket: &str) -> io::Result<()> {
        fs::create_dir_all(self.layout.bucket_dir(bucket)).await
    }

    /// Whether a bucket directory exists.
    pub async fn bucket_dir_exists(&self, bucket: &str) -> bool {
        fs::metadata(self.layout.bucket_dir(bucket))
            .await
            .is_ok_and(|m| m.is_dir())
    }

    /// Names of every non-reserved directory under the data root.
    pub async fn list_bucket_dirs(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.layout.root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if is_reserved_name(&name) {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a bucket's live tree.
    pub async fn remove_bucket_dir(&self, bucket: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.layout.bucket_dir(bucket)).await {
            Err(e) if !not_found(&e) => Err(e),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Open a temp file for a new version of `key`.
    pub async fn begin_write(
        &self,
        bucket: &str,
        key: &str,
        versioned: bool,
        encryption: Option<EncryptionAlgorithm>,
    ) -> StorageResult<VersionWriter> {
        fs::create_dir_all(self.layout.tmp_dir()).await?;
        let tmp_path = self.layout.tmp_dir().join(temp_file_name());
        let mut file = File::create(&tmp_path).await?;
        let encryptor = match encryption {
            Some(EncryptionAlgorithm::Aes256Gcm) => {
                let encryptor = ChunkedEncryptor::new(&self.key);
                if let Err(e) = file.write_all(&encryptor.header()).await {
                    drop(file);
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(e.into());
                }
                Some(encryptor)
            }
            None => None,
        };
        Ok(VersionWriter {
            store: self.clone(),
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            versioned,
            encryption,
            tmp_path,
            file: Some(file),
            encryptor,
            md5: StreamingMd5::new(),
        })
    }

    /// Stream `reader` into a new version.
    pub async fn put<R>(
        &self,
        bucket: &str,
        key: &str,
        reader: &mut R,
        versioned: bool,
        encryption: Option<EncryptionAlgorithm>,
    ) -> StorageResult<CommittedVersion>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut writer = self.begin_write(bucket, key, versioned, encryption).await?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    writer.abort().await;
                    return Err(e.into());
                }
            };
            if let Err(e) = writer.write(&buf[..n]).await {
                writer.abort().await;
                return Err(e.into());
            }
        }
        writer.commit().await
    }

    /// Create the directory of a folder placeholder.
    pub async fn create_folder(&self, bucket: &str, key: &str) -> io::Result<VersionStat> {
        let path = self.layout.key_path(bucket, key);
        fs::create_dir_all(&path).await?;
        let meta = fs::metadata(&path).await?;
        Ok(VersionStat {
            version_id: VersionId::FolderPlaceholder,
            size: 0,
            last_modified: system_time_to_utc(meta.modified().unwrap_or(SystemTime::now())),
            encryption: None,
        })
    }

    /// Atomically rewrite a key's pointer.
    pub async fn write_pointer(&self, bucket: &str, key: &str, version: &VersionId) -> io::Result<()> {
        let tmp = self.layout.tmp_dir().join(temp_file_name());
        fs::write(&tmp, version.token()).await?;
        if let Err(e) = fs::rename(&tmp, self.layout.pointer_path(bucket, key)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Read a key's pointer.
    pub async fn read_pointer(&self, bucket: &str, key: &str) -> io::Result<PointerState> {
        match fs::read_to_string(self.layout.pointer_path(bucket, key)).await {
            Ok(contents) => Ok(parse_pointer(&contents)),
            Err(e) if not_found(&e) || e.kind() == io::ErrorKind::NotADirectory => {
                Ok(PointerState::Absent)
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_pointer(&self, bucket: &str, key: &str) -> io::Result<()> {
        match fs::remove_file(self.layout.pointer_path(bucket, key)).await {
            Err(e) if !not_found(&e) => Err(e),
            _ => Ok(()),
        }
    }

    /// Move a legacy flat file into a freshly created key directory.
    async fn migrate_legacy(&self, bucket: &str, key: &str, versioned: bool) -> io::Result<VersionId> {
        let key_path = self.layout.key_path(bucket, key);
        let meta = fs::metadata(&key_path).await?;
        let target = if versioned {
            VersionId::Timestamp(system_time_to_nanos(
                meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ))
        } else {
            VersionId::NonVersioned
        };
        let parked = self.layout.tmp_dir().join(temp_file_name());
        fs::rename(&key_path, &parked).await?;
        fs::create_dir_all(&key_path).await?;
        fs::rename(&parked, self.layout.version_path(bucket, key, &target)).await?;
        if versioned {
            self.write_pointer(bucket, key, &target).await?;
        }
        info!(bucket, key, version = %target, "migrated legacy flat file into key directory");
        Ok(target)
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Resolve the version an unversioned read of `key` addresses.
    ///
    /// Order: legacy flat file, pointer, `simple`, folder directory. A
    /// dangling or missing pointer falls back to the newest version on disk.
    pub async fn resolve_latest(&self, bucket: &str, key: &str) -> io::Result<Option<VersionId>> {
        let key_path = self.layout.key_path(bucket, key);
        let meta = match fs::symlink_metadata(&key_path).await {
            Ok(meta) => meta,
            Err(e) if not_found(&e) || e.kind() == io::ErrorKind::NotADirectory => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if is_folder_key(key) {
            return Ok(meta.is_dir().then_some(VersionId::FolderPlaceholder));
        }
        if meta.is_file() {
            return Ok(Some(VersionId::LegacyFlatFile));
        }

        if let PointerState::Valid(v) = self.read_pointer(bucket, key).await? {
            if self.version_exists(bucket, key, &v).await {
                return Ok(Some(v));
            }
        }
        let simple = self.layout.version_path(bucket, key, &VersionId::NonVersioned);
        if fs::metadata(&simple).await.is_ok_and(|m| m.is_file())
            && self.read_pointer(bucket, key).await? == PointerState::Absent
        {
            return Ok(Some(VersionId::NonVersioned));
        }
        Ok(self
            .list_versions(bucket, key)
            .await?
            .first()
            .map(|s| s.version_id))
    }

    /// Whether a version's bytes exist in the live tree.
    pub async fn version_exists(&self, bucket: &str, key: &str, version: &VersionId) -> bool {
        let path = self.layout.version_path(bucket, key, version);
        match fs::symlink_metadata(&path).await {
            Ok(meta) => match version {
                VersionId::FolderPlaceholder => meta.is_dir(),
                _ => meta.is_file(),
            },
            Err(_) => false,
        }
    }

    /// Stat one version, `None` when absent.
    pub async fn stat(
        &self,
        bucket: &str,
        key: &str,
        version: &VersionId,
    ) -> io::Result<Option<VersionStat>> {
        if !self.version_exists(bucket, key, version).await {
            return Ok(None);
        }
        let path = self.layout.version_path(bucket, key, version);
        if *version == VersionId::FolderPlaceholder {
            let meta = fs::metadata(&path).await?;
            return Ok(Some(VersionStat {
                version_id: *version,
                size: 0,
                last_modified: system_time_to_utc(meta.modified()?),
                encryption: None,
            }));
        }
        let path_for_task = path.clone();
        let version = *version;
        let stat = tokio::task::spawn_blocking(move || stat_version_file(&path_for_task, version))
            .await
            .map_err(io::Error::other)?;
        match stat {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open a version for reading. `None` resolves the latest version.
    pub async fn open(
        &self,
        bucket: &str,
        key: &str,
        version: Option<&VersionId>,
    ) -> StorageResult<(ObjectBody, VersionStat)> {
        let missing = || match version {
            Some(v) => StorageError::NoSuchVersion {
                key: key.to_owned(),
                version_id: v.token(),
            },
            None => StorageError::NoSuchKey {
                key: key.to_owned(),
            },
        };
        let resolved = match version {
            Some(v) => *v,
            None => self.resolve_latest(bucket, key).await?.ok_or_else(missing)?,
        };
        let stat = self
            .stat(bucket, key, &resolved)
            .await?
            .ok_or_else(missing)?;
        if resolved == VersionId::FolderPlaceholder {
            return Ok((Box::new(tokio::io::empty()), stat));
        }

        let path = self.layout.version_path(bucket, key, &resolved);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if not_found(&e) => return Err(missing()),
            Err(e) => return Err(e.into()),
        };
        let body: ObjectBody = if stat.encryption.is_some() {
            let file_len = file.metadata().await?.len();
            Box::new(crypto::decrypting_reader(file, file_len, &self.key))
        } else {
            Box::new(file)
        };
        debug!(bucket, key, version = %resolved, size = stat.size, "opened version");
        Ok((body, stat))
    }

    /// Every version of `key` in the live tree, newest first.
    pub async fn list_versions(&self, bucket: &str, key: &str) -> io::Result<Vec<VersionStat>> {
        let key_path = self.layout.key_path(bucket, key);
        let (is_folder, key_owned) = (is_folder_key(key), key.to_owned());
        tokio::task::spawn_blocking(move || list_versions_blocking(&key_path, is_folder, &key_owned))
            .await
            .map_err(io::Error::other)?
    }

    // -----------------------------------------------------------------------
    // Removal and repair
    // -----------------------------------------------------------------------

    /// Delete a version's bytes. Folder directories are only removed when empty.
    pub async fn delete_version(&self, bucket: &str, key: &str, version: &VersionId) -> io::Result<()> {
        let path = self.layout.version_path(bucket, key, version);
        let result = match version {
            VersionId::FolderPlaceholder => match fs::remove_dir(&path).await {
                Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                    debug!(bucket, key, "folder placeholder not empty, keeping directory");
                    Ok(())
                }
                other => other,
            },
            _ => fs::remove_file(&path).await,
        };
        match result {
            Err(e) if !not_found(&e) => Err(e),
            _ => Ok(()),
        }
    }

    /// Point `.latest` at an existing version, or drop it when none remain.
    pub async fn repair_pointer(&self, bucket: &str, key: &str) -> io::Result<PointerRepair> {
        if is_folder_key(key) {
            return Ok(PointerRepair::NotVersioned);
        }
        let pointer = self.read_pointer(bucket, key).await?;
        let versions = self.list_versions(bucket, key).await?;
        let versions: Vec<&VersionStat> = versions
            .iter()
            .filter(|s| s.version_id != VersionId::LegacyFlatFile)
            .collect();

        match pointer {
            PointerState::Valid(v) if versions.iter().any(|s| s.version_id == v) => {
                Ok(PointerRepair::Intact)
            }
            PointerState::Absent if !versions.iter().any(|s| s.version_id.is_timestamp()) => {
                Ok(PointerRepair::NotVersioned)
            }
            _ => {
                if let Some(newest) = versions.first() {
                    self.write_pointer(bucket, key, &newest.version_id).await?;
                    info!(bucket, key, version = %newest.version_id, "promoted newest version to latest");
                    Ok(PointerRepair::Promoted(newest.version_id))
                } else {
                    self.remove_pointer(bucket, key).await?;
                    info!(bucket, key, "removed pointer with no remaining versions");
                    Ok(PointerRepair::Removed)
                }
            }
        }
    }

    /// Remove now-empty directories from the key upwards.
    ///
    /// Stops at the bucket root, at the first non-empty directory, and at
    /// any ancestor for which `is_folder` reports an explicit placeholder.
    pub async fn prune_empty_dirs<F>(&self, bucket: &str, key: &str, is_folder: F)
    where
        F: Fn(&str) -> bool + Send + Sync,
    {
        let bucket_dir = self.layout.bucket_dir(bucket);
        let mut dir = self.layout.key_path(bucket, key);
        let mut first = true;
        while dir != bucket_dir && dir.starts_with(&bucket_dir) {
            if !first {
                let folder_key = dir
                    .strip_prefix(&bucket_dir)
                    .ok()
                    .and_then(Layout::key_from_relative)
                    .map(|k| format!("{k}/"));
                if folder_key.as_deref().is_some_and(&is_folder) {
                    break;
                }
            }
            match fs::remove_dir(&dir).await {
                Ok(()) => debug!(path = %dir.display(), "removed empty directory"),
                Err(e) if not_found(&e) => {}
                Err(_) => break,
            }
            first = false;
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Walk a bucket directory and classify everything on disk.
    ///
    /// Fails only when the bucket directory itself cannot be read; other
    /// unreadable paths are recorded in [`BucketScan::errors`].
    pub async fn scan_bucket(&self, bucket: &str) -> io::Result<BucketScan> {
        let root = self.layout.bucket_dir(bucket);
        tokio::task::spawn_blocking(move || scan_bucket_blocking(&root))
            .await
            .map_err(io::Error::other)?
    }
}

fn parse_pointer(contents: &str) -> PointerState {
    match contents.trim().parse::<VersionId>() {
        Ok(v @ (VersionId::Timestamp(_) | VersionId::NonVersioned)) => PointerState::Valid(v),
        _ => PointerState::Invalid,
    }
}

fn stat_version_file(path: &Path, version: VersionId) -> io::Result<VersionStat> {
    let meta = std::fs::metadata(path)?;
    let len = meta.len();
    let mut encryption = None;
    if len >= crypto::HEADER_LEN as u64 {
        let mut header = [0u8; 8];
        let mut file = std::fs::File::open(path)?;
        std::io::Read::read_exact(&mut file, &mut header)?;
        if crypto::is_encrypted_header(&header) {
            encryption = Some(EncryptionAlgorithm::Aes256Gcm);
        }
    }
    Ok(VersionStat {
        version_id: version,
        size: if encryption.is_some() {
            crypto::plaintext_len(len)
        } else {
            len
        },
        last_modified: system_time_to_utc(meta.modified()?),
        encryption,
    })
}

fn list_versions_blocking(key_path: &Path, is_folder: bool, key: &str) -> io::Result<Vec<VersionStat>> {
    let meta = match std::fs::symlink_metadata(key_path) {
        Ok(meta) => meta,
        Err(e) if not_found(&e) || e.kind() == io::ErrorKind::NotADirectory => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if is_folder {
        if !meta.is_dir() {
            return Ok(Vec::new());
        }
        return Ok(vec![VersionStat {
            version_id: VersionId::FolderPlaceholder,
            size: 0,
            last_modified: system_time_to_utc(meta.modified()?),
            encryption: None,
        }]);
    }
    if meta.is_file() {
        return Ok(vec![stat_version_file(key_path, VersionId::LegacyFlatFile)?]);
    }

    let mut stats = Vec::new();
    for entry in std::fs::read_dir(key_path)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !entry.file_type()?.is_file() || !VersionId::is_version_file_name(&name) {
            continue;
        }
        let Ok(version) = name.parse::<VersionId>() else {
            continue;
        };
        match stat_version_file(&entry.path(), version) {
            Ok(stat) => stats.push(stat),
            Err(e) if not_found(&e) => {}
            Err(e) => {
                debug!(key, version = %version, error = %e, "skipping unreadable version");
            }
        }
    }
    sort_stats_newest_first(&mut stats);
    Ok(stats)
}

fn scan_bucket_blocking(root: &Path) -> io::Result<BucketScan> {
    let mut scan = BucketScan::default();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e),
            Err(e) => {
                scan.errors.push(format!("{}: {e}", dir.display()));
                continue;
            }
        };

        let mut files = Vec::new();
        let mut has_pointer = false;
        let mut visible = 0usize;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    scan.errors.push(format!("{}: {e}", dir.display()));
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name == POINTER_FILE {
                has_pointer = true;
                continue;
            }
            if is_reserved_name(&name) {
                continue;
            }
            visible += 1;
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => stack.push(entry.path()),
                Ok(ft) if ft.is_file() => files.push(name),
                Ok(_) => {}
                Err(e) => scan.errors.push(format!("{}: {e}", entry.path().display())),
            }
        }

        let relative_key = dir
            .strip_prefix(root)
            .ok()
            .and_then(Layout::key_from_relative);
        let is_object_dir =
            has_pointer || files.iter().any(|f| VersionId::is_version_file_name(f));

        if let (Some(key), true) = (&relative_key, is_object_dir) {
            let mut versions = Vec::new();
            for name in files.iter().filter(|f| VersionId::is_version_file_name(f)) {
                let Ok(version) = name.parse::<VersionId>() else {
                    continue;
                };
                match stat_version_file(&dir.join(name), version) {
                    Ok(stat) => versions.push(stat),
                    Err(e) => scan.errors.push(format!("{}/{name}: {e}", dir.display())),
                }
            }
            sort_stats_newest_first(&mut versions);
            let pointer = if has_pointer {
                match std::fs::read_to_string(dir.join(POINTER_FILE)) {
                    Ok(contents) => parse_pointer(&contents),
                    Err(_) => PointerState::Invalid,
                }
            } else {
                PointerState::Absent
            };
            scan.objects.push(ScannedObject {
                key: key.clone(),
                pointer,
                versions,
            });
            continue;
        }

        for name in &files {
            let key = match &relative_key {
                Some(parent) => format!("{parent}/{name}"),
                None => name.clone(),
            };
            match stat_version_file(&dir.join(name), VersionId::LegacyFlatFile) {
                Ok(stat) => scan.objects.push(ScannedObject {
                    key,
                    pointer: PointerState::Absent,
                    versions: vec![stat],
                }),
                Err(e) => scan.errors.push(format!("{}/{name}: {e}", dir.display())),
            }
        }

        if let Some(key) = &relative_key {
            if visible == 0 {
                match std::fs::metadata(&dir).and_then(|m| m.modified()) {
                    Ok(modified) => scan.objects.push(ScannedObject {
                        key: format!("{key}/"),
                        pointer: PointerState::Absent,
                        versions: vec![VersionStat {
                            version_id: VersionId::FolderPlaceholder,
                            size: 0,
                            last_modified: system_time_to_utc(modified),
                            encryption: None,
                        }],
                    }),
                    Err(e) => scan.errors.push(format!("{}: {e}", dir.display())),
                }
            }
        }
    }

    scan.objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(scan)
}

// ---------------------------------------------------------------------------
// VersionWriter
// ---------------------------------------------------------------------------

/// An in-flight version write.
///
/// Bytes go to a temp file; [`VersionWriter::commit`] makes them durable
/// and visible. Dropping without commit leaves only the temp file, which
/// [`VersionWriter::abort`] removes.
#[derive(Debug)]
pub struct VersionWriter {
    store: VersionStore,
    bucket: String,
    key: String,
    versioned: bool,
    encryption: Option<EncryptionAlgorithm>,
    tmp_path: PathBuf,
    file: Option<File>,
    encryptor: Option<ChunkedEncryptor>,
    md5: StreamingMd5,
}

impl VersionWriter {
    /// Append plaintext.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.md5.update(data);
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("writer already finished"))?;
        match self.encryptor.as_mut() {
            Some(encryptor) => {
                let sealed = encryptor.update(data)?;
                if !sealed.is_empty() {
                    file.write_all(&sealed).await?;
                }
            }
            None => file.write_all(data).await?,
        }
        Ok(())
    }

    /// Discard the temp file.
    pub async fn abort(mut self) {
        drop(self.file.take());
        let _ = fs::remove_file(&self.tmp_path).await;
    }

    /// Fsync, rename into place and update the pointer.
    pub async fn commit(mut self) -> StorageResult<CommittedVersion> {
        match self.commit_inner().await {
            Ok(committed) => Ok(committed),
            Err(e) => {
                drop(self.file.take());
                let _ = fs::remove_file(&self.tmp_path).await;
                Err(e)
            }
        }
    }

    async fn commit_inner(&mut self) -> StorageResult<CommittedVersion> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| io::Error::other("writer already finished"))?;
        if let Some(encryptor) = self.encryptor.take() {
            file.write_all(&encryptor.finish()?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let store = &self.store;
        let (bucket, key) = (self.bucket.as_str(), self.key.as_str());
        let key_path = store.layout.key_path(bucket, key);

        let migrated_legacy = match fs::symlink_metadata(&key_path).await {
            Ok(meta) if meta.is_file() => Some(store.migrate_legacy(bucket, key, self.versioned).await?),
            Ok(_) => None,
            Err(e) if not_found(&e) => {
                fs::create_dir_all(&key_path).await?;
                None
            }
            Err(e) => return Err(e.into()),
        };

        let version_id = if self.versioned {
            VersionId::next()
        } else {
            VersionId::NonVersioned
        };
        let final_path = store.layout.version_path(bucket, key, &version_id);
        fs::rename(&self.tmp_path, &final_path).await?;

        if self.versioned {
            store.write_pointer(bucket, key, &version_id).await?;
        } else if store.read_pointer(bucket, key).await? != PointerState::Absent {
            store.write_pointer(bucket, key, &version_id).await?;
        }

        let meta = fs::metadata(&final_path).await?;
        let size = self.md5.bytes();
        let etag = std::mem::take(&mut self.md5).finalize_hex();
        debug!(bucket, key, version = %version_id, size, "committed version");
        Ok(CommittedVersion {
            stat: VersionStat {
                version_id,
                size,
                last_modified: system_time_to_utc(meta.modified()?),
                encryption: self.encryption,
            },
            etag,
            migrated_legacy,
        })
    }
}
