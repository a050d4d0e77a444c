//! RPC-facing read API over a [`ContentCache`].

use std::fs::File;
use std::sync::Arc;

use termite_proto::{ContentRequest, ContentResponse};

use crate::{CacheError, ContentCache, Result};

/// Serves ranged reads of committed blobs. Refuses hashes it does not
/// have; callers drive chunking.
pub struct ContentServer {
    cache: Arc<ContentCache>,
}

impl ContentServer {
    pub fn new(cache: Arc<ContentCache>) -> Self {
        ContentServer { cache }
    }

    pub fn file_content(&self, req: &ContentRequest) -> Result<ContentResponse> {
        if !self.cache.has_hash(&req.hash) {
            return Err(CacheError::NotFound {
                hash: ContentCache::hash_to_hex(&req.hash),
            });
        }
        let file = File::open(self.cache.path(&req.hash))?;
        let len = file.metadata()?.len();
        let start = req.start.min(len);
        let end = req.end.min(len);
        if start >= end {
            return Ok(ContentResponse { chunk: Vec::new() });
        }
        // Safety: blobs are immutable once committed.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(ContentResponse {
            chunk: mmap[start as usize..end as usize].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ranged_reads() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(ContentCache::new(temp.path()).unwrap());
        let hash = cache.save(b"0123456789").unwrap();
        let server = ContentServer::new(cache);

        let resp = server
            .file_content(&ContentRequest { hash, start: 2, end: 6 })
            .unwrap();
        assert_eq!(resp.chunk, b"2345");

        // Ranges are clamped to the blob length.
        let resp = server
            .file_content(&ContentRequest { hash, start: 8, end: 100 })
            .unwrap();
        assert_eq!(resp.chunk, b"89");
    }

    #[test]
    fn unknown_hash_is_refused() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(ContentCache::new(temp.path()).unwrap());
        let server = ContentServer::new(cache);

        let missing = ContentCache::compute_hash(b"never stored");
        let err = server
            .file_content(&ContentRequest { hash: missing, start: 0, end: 10 })
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }

    #[test]
    fn empty_blob_reads_empty() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(ContentCache::new(temp.path()).unwrap());
        let hash = cache.save(b"").unwrap();
        let server = ContentServer::new(cache);

        let resp = server
            .file_content(&ContentRequest { hash, start: 0, end: 10 })
            .unwrap();
        assert!(resp.chunk.is_empty());
    }
}
