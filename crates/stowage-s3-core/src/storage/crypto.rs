//! Chunked AES-256-GCM encryption for stored versions.
//!
//! Encrypted files carry a 16-byte header (`STWENC01` magic plus an 8-byte
//! random nonce prefix) followed by frames:
//!
//! ```text
//! [u32 le ciphertext_len][ciphertext + 16-byte tag]
//! ```
//!
//! Each frame seals at most [`CHUNK_SIZE`] bytes of plaintext. The nonce is
//! `prefix || frame_counter` and the associated data is
//! `frame_counter || final_flag`, so reordered, dropped or truncated frames
//! fail authentication. Because every frame adds exactly
//! [`FRAME_OVERHEAD`] bytes, the plaintext size follows from the file
//! length alone (see [`plaintext_len`]).

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// File magic identifying an encrypted version.
pub const MAGIC: &[u8; 8] = b"STWENC01";
/// Length of the random nonce prefix.
pub const NONCE_PREFIX_LEN: usize = 8;
/// Header length: magic plus nonce prefix.
pub const HEADER_LEN: usize = MAGIC.len() + NONCE_PREFIX_LEN;
/// Plaintext bytes per frame.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;
/// Bytes each frame adds on top of its plaintext.
pub const FRAME_OVERHEAD: usize = 4 + TAG_LEN;

/// Whether `bytes` starts with the encrypted-file magic.
#[must_use]
pub fn is_encrypted_header(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
}

/// Plaintext length of an encrypted file of `file_len` bytes.
#[must_use]
pub fn plaintext_len(file_len: u64) -> u64 {
    let header = HEADER_LEN as u64;
    let frame = (CHUNK_SIZE + FRAME_OVERHEAD) as u64;
    let overhead = FRAME_OVERHEAD as u64;
    if file_len < header + overhead {
        return 0;
    }
    let body = file_len - header;
    let frames = body.div_ceil(frame);
    body - frames * overhead
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn frame_aad(counter: u32, last: bool) -> [u8; 5] {
    let mut aad = [0u8; 5];
    aad[..4].copy_from_slice(&counter.to_be_bytes());
    aad[4] = u8::from(last);
    aad
}

// ---------------------------------------------------------------------------
// MasterKey
// ---------------------------------------------------------------------------

/// The 256-bit key every encrypted version is sealed with.
#[derive(Clone)]
pub struct MasterKey {
    key: Key<Aes256Gcm>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

impl MasterKey {
    /// Generate a random key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: Aes256Gcm::generate_key(OsRng),
        }
    }

    /// Parse a 64-character hex key.
    pub fn from_hex(value: &str) -> StorageResult<Self> {
        let raw = hex::decode(value.trim()).map_err(|e| StorageError::InvalidArgument {
            message: format!("encryption key is not valid hex: {e}"),
        })?;
        if raw.len() != 32 {
            return Err(StorageError::InvalidArgument {
                message: format!("encryption key must be 32 bytes, got {}", raw.len()),
            });
        }
        Ok(Self {
            key: Key::<Aes256Gcm>::clone_from_slice(&raw),
        })
    }

    /// Hex encoding of the key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_slice())
    }

    /// Use the configured key, else load `path`, else generate and persist one.
    pub async fn load_or_create(path: &Path, configured: Option<&str>) -> StorageResult<Self> {
        if let Some(hex_key) = configured {
            debug!("using configured master key");
            return Self::from_hex(hex_key);
        }
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => return Self::from_hex(&contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let key = Self::generate();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, key.to_hex()).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&tmp, path).await?;
        info!(path = %path.display(), "generated new master key");
        Ok(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.key)
    }
}

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

/// Incremental encryptor producing the framed format.
///
/// Plaintext is buffered into [`CHUNK_SIZE`] frames. A full chunk is only
/// sealed once more input arrives, so the final frame is always known.
pub struct ChunkedEncryptor {
    cipher: Aes256Gcm,
    prefix: [u8; NONCE_PREFIX_LEN],
    counter: u32,
    pending: Vec<u8>,
}

impl std::fmt::Debug for ChunkedEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedEncryptor")
            .field("counter", &self.counter)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ChunkedEncryptor {
    /// Start a new stream with a random nonce prefix.
    #[must_use]
    pub fn new(key: &MasterKey) -> Self {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(&nonce[..NONCE_PREFIX_LEN]);
        Self {
            cipher: key.cipher(),
            prefix,
            counter: 0,
            pending: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// File header to write before any frame.
    #[must_use]
    pub fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..MAGIC.len()].copy_from_slice(MAGIC);
        header[MAGIC.len()..].copy_from_slice(&self.prefix);
        header
    }

    /// Absorb plaintext, returning any sealed frames ready to be written.
    pub fn update(&mut self, mut data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while !data.is_empty() {
            if self.pending.len() == CHUNK_SIZE {
                let chunk = std::mem::take(&mut self.pending);
                out.extend(self.seal(&chunk, false)?);
                self.pending = chunk;
                self.pending.clear();
            }
            let take = (CHUNK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
        Ok(out)
    }

    /// Seal the remaining plaintext as the final frame.
    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        let chunk = std::mem::take(&mut self.pending);
        self.seal(&chunk, true)
    }

    fn seal(&mut self, plaintext: &[u8], last: bool) -> io::Result<Vec<u8>> {
        let nonce = frame_nonce(&self.prefix, self.counter);
        let aad = frame_aad(self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| io::Error::other("frame encryption failed"))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| io::Error::other("frame counter exhausted"))?;
        let len = u32::try_from(ciphertext.len())
            .map_err(|_| io::Error::other("frame too large"))?;
        let mut frame = Vec::with_capacity(4 + ciphertext.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }
}

// ---------------------------------------------------------------------------
// Opening
// ---------------------------------------------------------------------------

struct FrameOpener {
    cipher: Aes256Gcm,
    prefix: [u8; NONCE_PREFIX_LEN],
    counter: u32,
}

impl FrameOpener {
    fn from_header(key: &MasterKey, header: &[u8; HEADER_LEN]) -> io::Result<Self> {
        if !is_encrypted_header(header) {
            return Err(invalid_data("missing encryption header"));
        }
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        prefix.copy_from_slice(&header[MAGIC.len()..]);
        Ok(Self {
            cipher: key.cipher(),
            prefix,
            counter: 0,
        })
    }

    fn open(&mut self, ciphertext: &[u8], last: bool) -> io::Result<Vec<u8>> {
        let nonce = frame_nonce(&self.prefix, self.counter);
        let aad = frame_aad(self.counter, last);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| invalid_data(format!("frame {} failed authentication", self.counter)))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| invalid_data("frame counter exhausted"))?;
        Ok(plaintext)
    }
}

/// Stream the plaintext of an encrypted file.
///
/// Frames are decrypted on a background task and handed over through a
/// bounded channel, so memory stays at a couple of frames regardless of file
/// size. Authentication failures surface as `InvalidData` read errors.
#[must_use]
pub fn decrypting_reader(file: File, file_len: u64, key: &MasterKey) -> ChannelReader {
    let (tx, rx) = mpsc::channel(2);
    let key = key.clone();
    tokio::spawn(async move {
        if let Err(e) = pump_frames(file, file_len, &key, &tx).await {
            let _ = tx.send(Err(e)).await;
        }
    });
    ChannelReader::new(rx)
}

async fn pump_frames(
    mut file: File,
    file_len: u64,
    key: &MasterKey,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> io::Result<()> {
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header).await?;
    let mut opener = FrameOpener::from_header(key, &header)?;
    let mut offset = HEADER_LEN as u64;
    let mut frame = Vec::with_capacity(CHUNK_SIZE + TAG_LEN);

    loop {
        if offset >= file_len {
            return Err(invalid_data("encrypted stream ended without a final frame"));
        }
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if !(TAG_LEN..=CHUNK_SIZE + TAG_LEN).contains(&len) {
            return Err(invalid_data(format!("invalid frame length {len}")));
        }
        frame.resize(len, 0);
        file.read_exact(&mut frame).await?;
        offset += (4 + len) as u64;
        let last = offset >= file_len;
        let plaintext = opener.open(&frame, last)?;
        if tx.send(Ok(Bytes::from(plaintext))).await.is_err() {
            return Ok(());
        }
        if last {
            return Ok(());
        }
    }
}

/// [`AsyncRead`] over chunks delivered by a producer task.
#[derive(Debug)]
pub struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    done: bool,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            done: false,
        }
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.current.is_empty() {
                let n = buf.remaining().min(this.current.len());
                buf.put_slice(&this.current.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.current = chunk,
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Err(e));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
