//! Synchronous framing: a 12-byte header (u32 little-endian payload
//! length, u64 little-endian sequence id) followed by a bincode payload.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::RpcError;

/// Hard cap on a single frame. Content transfer stays well below this:
/// chunks are 1 MiB.
pub const MAX_FRAME: u32 = 16 << 20;

pub const HEADER_LEN: usize = 12;

pub fn write_frame<W: Write, T: Serialize>(w: &mut W, seq: u64, msg: &T) -> Result<(), RpcError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME as usize {
        return Err(RpcError::FrameTooLarge(payload.len()));
    }
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4..].copy_from_slice(&seq.to_le_bytes());
    w.write_all(&header)?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<(u64, T), RpcError> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
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
    r.read_exact(&mut payload)?;
    Ok((seq, bincode::deserialize(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ConnHello;

    #[test]
    fn roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 7, &ConnHello { id: "fwd-1".into() }).unwrap();
        let (seq, hello): (u64, ConnHello) = read_frame(&mut buf.as_slice()).unwrap();
        assert_eq!(seq, 7);
        assert_eq!(hello.id, "fwd-1");
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME + 1).to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        let err = read_frame::<_, ConnHello>(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, RpcError::FrameTooLarge(_)));
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1, &ConnHello { id: "x".into() }).unwrap();
        buf.truncate(buf.len() - 1);
        let err = read_frame::<_, ConnHello>(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, RpcError::Io(_)));
    }
}
