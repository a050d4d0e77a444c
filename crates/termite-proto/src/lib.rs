//! # termite-proto
//!
//! Wire protocol for Termite: the data model exchanged between masters,
//! workers and the coordinator, the framed bincode transport it travels
//! over, and the challenge-response authentication run on every
//! worker-facing connection.

pub mod attr;
pub mod auth;
pub mod frame;
pub mod frame_async;
pub mod messages;
pub mod rpc;

pub use attr::{FileAttr, FileInfo, Hash, NameModeMap, Status};
pub use messages::*;
pub use rpc::{AsyncConn, NetConn, RpcClient};

use thiserror::Error;

/// Errors surfaced by the transport layer.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("authentication rejected")]
    AuthRejected,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("unexpected response variant")]
    UnexpectedResponse,
}

impl RpcError {
    /// True when the error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
            || e.kind() == std::io::ErrorKind::ConnectionReset
            || e.kind() == std::io::ErrorKind::BrokenPipe)
    }
}

/// Directory-prefix test: `prefix` equals `path` or names one of its
/// ancestor directories. `"a"` is a prefix of `"a/b"` but `"ab"` is not.
pub fn has_dir_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Bound log-line summaries of captured output to 1 KiB. Full streams
/// still travel in `WorkReply`.
pub fn trim(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(1024)]
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_prefix() {
        assert!(has_dir_prefix("a/b", "a"));
        assert!(has_dir_prefix("a", "a"));
        assert!(has_dir_prefix("/src/foo/bar.cc", "/src/foo"));
        assert!(!has_dir_prefix("a/b", "ab"));
        assert!(!has_dir_prefix("ab", "a"));
    }

    #[test]
    fn trim_bounds_long_output() {
        let long = vec![b'x'; 4096];
        assert_eq!(trim(&long).len(), 1024);
        assert_eq!(trim(b"short"), b"short");
    }
}
