//! Multipart staging.
//!
//! Each upload owns `<data_dir>/.uploads/<upload_id>/` holding an
//! `upload.json` manifest and one `part-<n>` file per uploaded part. Parts
//! are streamed into a temp file in the staging directory and renamed into
//! place, so a re-uploaded part replaces the previous bytes atomically.

use std::io;

use chrono::Utc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::checksums::StreamingMd5;
use crate::error::{StorageError, StorageResult};
use crate::state::multipart::{MAX_PART_NUMBER, MIN_PART_NUMBER};
use crate::state::{CompletedPart, MultipartUpload, PartRecord};
use crate::storage::{COPY_BUFFER_SIZE, Layout, VersionWriter};
use crate::utils::temp_file_name;

fn not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound
}

/// Reject part numbers outside 1..=10000.
pub fn validate_part_number(part_number: u32) -> StorageResult<()> {
    if (MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
        Ok(())
    } else {
        Err(StorageError::InvalidArgument {
            message: format!(
                "part number {part_number} is outside {MIN_PART_NUMBER}..={MAX_PART_NUMBER}"
            ),
        })
    }
}

/// Sort the requested parts ascending and reject duplicates.
pub fn order_parts(upload_id: &str, parts: &[CompletedPart]) -> StorageResult<Vec<CompletedPart>> {
    if parts.is_empty() {
        return Err(StorageError::InvalidPart {
            message: format!("upload {upload_id} completed with no parts"),
        });
    }
    let mut ordered = parts.to_vec();
    ordered.sort_by_key(|p| p.part_number);
    for pair in ordered.windows(2) {
        if pair[0].part_number == pair[1].part_number {
            return Err(StorageError::InvalidPart {
                message: format!("part {} listed more than once", pair[0].part_number),
            });
        }
    }
    for part in &ordered {
        validate_part_number(part.part_number)?;
    }
    Ok(ordered)
}

fn normalize_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

/// Filesystem staging area for multipart uploads.
#[derive(Debug, Clone)]
pub struct UploadStaging {
    layout: Layout,
}

impl UploadStaging {
    /// Staging rooted at the layout's uploads directory.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Create the staging directory and write the manifest.
    pub async fn create(&self, upload: &MultipartUpload) -> StorageResult<()> {
        let dir = self.layout.upload_dir(&upload.upload_id);
        fs::create_dir_all(&dir).await?;
        let tmp = dir.join(temp_file_name());
        fs::write(&tmp, serde_json::to_vec_pretty(upload)?).await?;
        fs::rename(&tmp, self.layout.manifest_path(&upload.upload_id)).await?;
        Ok(())
    }

    /// Read an upload's manifest, `None` when the upload does not exist.
    pub async fn manifest(&self, upload_id: &str) -> StorageResult<Option<MultipartUpload>> {
        match fs::read(self.layout.manifest_path(upload_id)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every manifest under the staging root.
    pub async fn manifests(&self) -> StorageResult<Vec<MultipartUpload>> {
        let mut uploads = Vec::new();
        let mut entries = match fs::read_dir(self.layout.uploads_dir()).await {
            Ok(entries) => entries,
            Err(e) if not_found(&e) => return Ok(uploads),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Some(upload_id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Some(upload) = self.manifest(&upload_id).await? {
                uploads.push(upload);
            }
        }
        uploads.sort_by(|a, b| {
            a.initiated
                .cmp(&b.initiated)
                .then_with(|| a.upload_id.cmp(&b.upload_id))
        });
        Ok(uploads)
    }

    /// Stream one part into staging and return its record.
    pub async fn write_part<R>(
        &self,
        upload_id: &str,
        part_number: u32,
        reader: &mut R,
    ) -> StorageResult<PartRecord>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        validate_part_number(part_number)?;
        let dir = self.layout.upload_dir(upload_id);
        if !fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(StorageError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            });
        }

        let tmp = dir.join(temp_file_name());
        let result = stream_to_file(&tmp, reader).await;
        let md5 = match result {
            Ok(md5) => md5,
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(e.into());
            }
        };
        if let Err(e) = fs::rename(&tmp, self.layout.part_path(upload_id, part_number)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let size = md5.bytes();
        let record = PartRecord {
            part_number,
            size,
            etag: md5.finalize_hex(),
            last_modified: Utc::now(),
        };
        debug!(upload_id, part_number, size, "staged part");
        Ok(record)
    }

    /// Parts present on disk, with digests recomputed from their bytes.
    pub async fn parts_on_disk(&self, upload_id: &str) -> StorageResult<Vec<PartRecord>> {
        let mut entries = match fs::read_dir(self.layout.upload_dir(upload_id)).await {
            Ok(entries) => entries,
            Err(e) if not_found(&e) => {
                return Err(StorageError::NoSuchUpload {
                    upload_id: upload_id.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let mut parts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix("part-"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let mut file = File::open(entry.path()).await?;
            let mut md5 = StreamingMd5::new();
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                md5.update(&buf[..n]);
            }
            let modified = entry.metadata().await?.modified()?;
            parts.push(PartRecord {
                part_number: number,
                size: md5.bytes(),
                etag: md5.finalize_hex(),
                last_modified: crate::utils::system_time_to_utc(modified),
            });
        }
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    /// Fail with `IncompletePart` unless every requested part is staged.
    pub async fn check_parts(&self, upload_id: &str, parts: &[CompletedPart]) -> StorageResult<()> {
        for part in parts {
            let path = self.layout.part_path(upload_id, part.part_number);
            if !fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                return Err(StorageError::IncompletePart {
                    upload_id: upload_id.to_owned(),
                    part_number: part.part_number,
                });
            }
        }
        Ok(())
    }

    /// Stream the parts, in the given order, into `writer`.
    ///
    /// Returns the MD5 hex of every part. A caller-supplied etag that does
    /// not match the staged bytes fails with `InvalidPart`; the writer is
    /// left for the caller to abort.
    pub async fn assemble(
        &self,
        upload_id: &str,
        parts: &[CompletedPart],
        writer: &mut VersionWriter,
    ) -> StorageResult<Vec<String>> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut digests = Vec::with_capacity(parts.len());
        for part in parts {
            let path = self.layout.part_path(upload_id, part.part_number);
            let mut file = match File::open(&path).await {
                Ok(file) => file,
                Err(e) if not_found(&e) => {
                    return Err(StorageError::IncompletePart {
                        upload_id: upload_id.to_owned(),
                        part_number: part.part_number,
                    });
                }
                Err(e) => return Err(e.into()),
            };
            let mut md5 = StreamingMd5::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                md5.update(&buf[..n]);
                writer.write(&buf[..n]).await?;
            }
            let digest = md5.finalize_hex();
            if let Some(expected) = &part.etag {
                if normalize_etag(expected) != digest {
                    return Err(StorageError::InvalidPart {
                        message: format!(
                            "etag {expected} does not match part {}",
                            part.part_number
                        ),
                    });
                }
            }
            digests.push(digest);
        }
        Ok(digests)
    }

    /// Remove an upload's staging directory. Idempotent.
    pub async fn remove(&self, upload_id: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.layout.upload_dir(upload_id)).await {
            Err(e) if !not_found(&e) => Err(e),
            _ => Ok(()),
        }
    }
}

async fn stream_to_file<R>(path: &std::path::Path, reader: &mut R) -> io::Result<StreamingMd5>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut file = File::create(path).await?;
    let mut md5 = StreamingMd5::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(md5)
}
