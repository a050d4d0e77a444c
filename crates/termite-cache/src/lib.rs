//! # termite-cache
//!
//! Content-addressed blob store shared by one worker's mirrors (and by
//! the master for its own tree). Blobs are keyed by BLAKE3 digest and
//! stored one file each under a 2-level fan-out:
//!
//! ```text
//! <cache_dir>/
//! ├── tmp/                  # in-progress writes, never visible by hash
//! └── ab/cd/abcd1234...     # committed blob, filename = hex digest
//! ```
//!
//! Writes go through a temporary file and an atomic rename, so a blob is
//! either fully present under its hash name or absent; concurrent saves
//! of identical bytes race benignly on the rename.

mod server;
mod transfer;

pub use server::ContentServer;
pub use transfer::{fetch_between_content_servers, ChunkSource, CHUNK_SIZE};

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use termite_proto::Hash;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob not found: {hash}")]
    NotFound { hash: String },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("transfer failed: {0}")]
    Transfer(#[from] termite_proto::RpcError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

pub struct ContentCache {
    root: PathBuf,
    /// Paths the caller asserted immutable, already digested. Saves
    /// re-hashing shared build trees on every attribute response.
    immutable_paths: Mutex<HashMap<PathBuf, Hash>>,
    next_tmp_id: AtomicU64,
}

impl ContentCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("tmp"))?;
        Ok(ContentCache {
            root,
            immutable_paths: Mutex::new(HashMap::new()),
            next_tmp_id: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn compute_hash(data: &[u8]) -> Hash {
        *blake3::hash(data).as_bytes()
    }

    pub fn hash_to_hex(hash: &Hash) -> String {
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn hex_to_hash(hex: &str) -> Option<Hash> {
        if hex.len() != 64 {
            return None;
        }
        let mut hash = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            hash[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(hash)
    }

    /// Local path a committed blob lives at. Only meaningful while
    /// `has_hash` is true.
    pub fn path(&self, hash: &Hash) -> PathBuf {
        let hex = Self::hash_to_hex(hash);
        self.root.join(&hex[..2]).join(&hex[2..4]).join(&hex)
    }

    pub fn has_hash(&self, hash: &Hash) -> bool {
        self.path(hash).exists()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store bytes, returning their digest. A no-op when the blob is
    /// already present.
    pub fn save(&self, data: &[u8]) -> Result<Hash> {
        let hash = Self::compute_hash(data);
        if self.has_hash(&hash) {
            return Ok(hash);
        }
        let mut writer = self.begin()?;
        writer.append(data)?;
        writer.commit(Some(&hash))
    }

    /// Streaming save for blobs too large to buffer.
    pub fn save_stream<R: Read>(&self, mut r: R) -> Result<Hash> {
        let mut writer = self.begin()?;
        writer.append_from(&mut r)?;
        writer.commit(None)
    }

    /// Digest the file at `path` and index it into the store without
    /// copying when possible (hard link, falling back to a copy across
    /// filesystems). The caller asserts `path` will not change for the
    /// duration of the call.
    pub fn save_immutable_path<P: AsRef<Path>>(&self, path: P) -> Result<Hash> {
        let path = path.as_ref();
        if let Some(hash) = self.immutable_paths.lock().unwrap().get(path) {
            return Ok(*hash);
        }

        let mut reader = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut reader, &mut hasher)?;
        let hash = *hasher.finalize().as_bytes();

        if !self.has_hash(&hash) {
            let dest = self.path(&hash);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::hard_link(path, &dest).is_err() && !dest.exists() {
                let mut src = File::open(path)?;
                let mut writer = self.begin()?;
                writer.append_from(&mut src)?;
                writer.commit(Some(&hash))?;
            }
            debug!(path = %path.display(), hash = %Self::hash_to_hex(&hash), "indexed local file");
        }

        self.immutable_paths.lock().unwrap().insert(path.to_path_buf(), hash);
        Ok(hash)
    }

    /// Start an incremental write. Bytes land in `tmp/` and only become
    /// visible under their hash name on a successful [`CacheWriter::commit`].
    pub fn begin(&self) -> Result<CacheWriter<'_>> {
        let id = self.next_tmp_id.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self
            .root
            .join("tmp")
            .join(format!("write.{}.{}", std::process::id(), id));
        let file = File::create(&tmp_path)?;
        Ok(CacheWriter {
            cache: self,
            hasher: blake3::Hasher::new(),
            tmp_path,
            file: Some(file),
            len: 0,
        })
    }
}

/// An in-progress streaming save.
pub struct CacheWriter<'a> {
    cache: &'a ContentCache,
    hasher: blake3::Hasher,
    tmp_path: PathBuf,
    file: Option<File>,
    len: u64,
}

impl CacheWriter<'_> {
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.hasher.update(bytes);
        // The file is always present until commit takes it.
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)?;
        }
        self.len += bytes.len() as u64;
        Ok(())
    }

    pub fn append_from<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.append(&buf[..n])?;
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish the write. With `expected` set, a digest mismatch removes
    /// the temporary file and nothing becomes visible in the store.
    pub fn commit(mut self, expected: Option<&Hash>) -> Result<Hash> {
        let file = self.file.take();
        if let Some(file) = file {
            file.sync_all()?;
        }
        let hash = *self.hasher.finalize().as_bytes();

        if let Some(want) = expected {
            if *want != hash {
                let _ = fs::remove_file(&self.tmp_path);
                return Err(CacheError::HashMismatch {
                    expected: ContentCache::hash_to_hex(want),
                    actual: ContentCache::hash_to_hex(&hash),
                });
            }
        }

        let dest = self.cache.path(&hash);
        if dest.exists() {
            let _ = fs::remove_file(&self.tmp_path);
            return Ok(hash);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = fs::rename(&self.tmp_path, &dest) {
            let _ = fs::remove_file(&self.tmp_path);
            // A concurrent save of the same bytes won the rename.
            if dest.exists() {
                return Ok(hash);
            }
            return Err(CacheError::Io(e));
        }
        Ok(hash)
    }
}

impl Drop for CacheWriter<'_> {
    fn drop(&mut self) {
        if self.file.is_some() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}
