//! Mutual challenge-response authentication over a raw stream, run
//! before any frame is exchanged.
//!
//! Both sides hold the same pre-shared secret. Each writes a random
//! 32-byte nonce, reads the peer's nonce, answers with a keyed BLAKE3
//! hash of it, and verifies the peer's answer against its own nonce.
//! The handshake is symmetric, so neither side needs to know whether it
//! dialed or accepted.

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::RpcError;

pub const NONCE_LEN: usize = 32;

const AUTH_CONTEXT: &str = "termite 2026 stream auth v1";

pub fn derive_auth_key(secret: &[u8]) -> [u8; 32] {
    blake3::derive_key(AUTH_CONTEXT, secret)
}

pub async fn authenticate<S>(stream: &mut S, secret: &[u8]) -> Result<(), RpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = derive_auth_key(secret);

    let mut own_nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut own_nonce);
    stream.write_all(&own_nonce).await?;
    stream.flush().await?;

    let mut peer_nonce = [0u8; NONCE_LEN];
    stream.read_exact(&mut peer_nonce).await?;

    let proof = blake3::keyed_hash(&key, &peer_nonce);
    stream.write_all(proof.as_bytes()).await?;
    stream.flush().await?;

    let mut peer_proof = [0u8; 32];
    stream.read_exact(&mut peer_proof).await?;

    // blake3::Hash equality is constant-time.
    if blake3::keyed_hash(&key, &own_nonce) != blake3::Hash::from(peer_proof) {
        return Err(RpcError::AuthRejected);
    }
    Ok(())
}
