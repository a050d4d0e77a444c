//! Async twin of [`crate::frame`], used by every tokio-side service loop.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{HEADER_LEN, MAX_FRAME};
use crate::RpcError;

pub async fn write_frame<W, T>(w: &mut W, seq: u64, msg: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME as usize {
        return Err(RpcError::FrameTooLarge(payload.len()));
    }
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4..].copy_from_slice(&seq.to_le_bytes());
    w.write_all(&header).await?;
    w.write_all(&payload).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(r: &mut R) -> Result<(u64, T), RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header).await?;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[..4]);
    let mut seq_bytes = [0u8; 8];
    seq_bytes.copy_from_slice(&header[4..]);
    let len = u32::from_le_bytes(len_bytes);
    let seq = u64::from_le_bytes(seq_bytes);
    if len > MAX_FRAME {
        return Err(RpcError::FrameTooLarge(len as usize));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;
    Ok((seq, bincode::deserialize(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DirRequest, FsRequest};

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let req = FsRequest::ReadDir(DirRequest { name: "/src".into() });
        write_frame(&mut a, 42, &req).await.unwrap();
        let (seq, got): (u64, FsRequest) = read_frame(&mut b).await.unwrap();
        assert_eq!(seq, 42);
        assert!(matches!(got, FsRequest::ReadDir(d) if d.name == "/src"));
    }

    #[tokio::test]
    async fn closed_peer_reads_as_eof() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame::<_, FsRequest>(&mut b).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
