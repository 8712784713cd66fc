//! ETag computation.
//!
//! Single-request writes are tagged with the hex MD5 of their plaintext.
//! Multipart writes use the S3 composite form: the MD5 of the concatenated
//! binary part digests, suffixed with `-<part count>`.

use md5::{Digest, Md5};

/// Incremental MD5 hasher fed while bytes stream to disk.
#[derive(Debug, Clone, Default)]
pub struct StreamingMd5 {
    hasher: Md5,
    bytes: u64,
}

impl StreamingMd5 {
    /// Create an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish and return the hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Hex MD5 of a byte slice.
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Composite multipart etag from the hex digests of the parts, in order.
///
/// Digests that are not valid hex are skipped.
///
/// # Examples
///
/// ```
/// use stowage_s3_core::checksums::{composite_etag, md5_hex};
///
/// let etag = composite_etag(&[md5_hex(b"a"), md5_hex(b"b")]);
/// assert!(etag.ends_with("-2"));
/// ```
#[must_use]
pub fn composite_etag(part_digests: &[String]) -> String {
    let mut hasher = Md5::new();
    for digest in part_digests {
        if let Ok(raw) = hex::decode(digest.trim_matches('"')) {
            hasher.update(&raw);
        }
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_digests.len())
}
