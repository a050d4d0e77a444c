//! Peer-to-peer blob transfer: pull a blob from whichever peer serves
//! `FileContent`, chunk by chunk, into a local cache.

use std::future::Future;

use tracing::debug;

use termite_proto::{ContentRequest, ContentResponse, Hash, RpcError};

use crate::{CacheError, ContentCache, Result};

/// Chunk size for content transfer. Keeps individual RPC payloads well
/// under the frame cap.
pub const CHUNK_SIZE: u64 = 1 << 20;

/// The seam to any peer that can serve `FileContent` requests: the
/// reverse channel to the master, or another worker's daemon connection.
pub trait ChunkSource {
    fn chunk(
        &self,
        req: ContentRequest,
    ) -> impl Future<Output = std::result::Result<ContentResponse, RpcError>> + Send;
}

/// Fetch `size` bytes of `hash` from `peer` into `cache`. Fails on any
/// RPC error, a short read, or a digest mismatch; a failed fetch leaves
/// nothing in the cache.
pub async fn fetch_between_content_servers<C: ChunkSource + Sync>(
    peer: &C,
    size: u64,
    hash: Hash,
    cache: &ContentCache,
) -> Result<()> {
    if cache.has_hash(&hash) {
        return Ok(());
    }
    let mut writer = cache.begin()?;
    while writer.len() < size {
        let start = writer.len();
        let end = (start + CHUNK_SIZE).min(size);
        let resp = peer.chunk(ContentRequest { hash, start, end }).await?;
        if resp.chunk.is_empty() {
            return Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short read at {start} of {size}"),
            )));
        }
        writer.append(&resp.chunk)?;
    }
    writer.commit(Some(&hash))?;
    debug!(hash = %ContentCache::hash_to_hex(&hash), size, "fetched blob");
    Ok(())
}
