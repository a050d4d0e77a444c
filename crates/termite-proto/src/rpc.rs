//! Transport-agnostic connections and the serialized RPC client.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::{frame_async, RpcError};

/// Anything a Termite connection can run over: a TCP stream, a unix
/// stream, or an in-process duplex pipe in tests.
pub trait AsyncConn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncConn for T {}

/// A connection plus the peer label it was accepted with.
pub struct NetConn {
    pub stream: Box<dyn AsyncConn>,
    pub peer: String,
}

impl NetConn {
    pub fn new(stream: impl AsyncConn + 'static, peer: impl Into<String>) -> Self {
        NetConn { stream: Box::new(stream), peer: peer.into() }
    }
}

impl std::fmt::Debug for NetConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetConn").field("peer", &self.peer).finish()
    }
}

/// A request/response client over one framed connection. Calls hold the
/// stream lock across send and receive, so they are serialized and the
/// transport stays ordered.
pub struct RpcClient {
    stream: Mutex<Box<dyn AsyncConn>>,
    next_seq: AtomicU64,
}

impl RpcClient {
    pub fn new(stream: Box<dyn AsyncConn>) -> Self {
        RpcClient { stream: Mutex::new(stream), next_seq: AtomicU64::new(1) }
    }

    pub async fn call<Req, Resp>(&self, req: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut stream = self.stream.lock().await;
        frame_async::write_frame(&mut *stream, seq, req).await?;
        loop {
            let (got, resp) = frame_async::read_frame(&mut *stream).await?;
            if got == seq {
                return Ok(resp);
            }
            // A stale response from a call whose caller went away.
            tracing::debug!(want = seq, got, "discarding stale rpc response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ConnHello, DirRequest, DirResponse, FsRequest, FsResponse};

    #[tokio::test]
    async fn call_matches_response_by_sequence() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            loop {
                let (seq, req): (u64, FsRequest) =
                    match frame_async::read_frame(&mut server_io).await {
                        Ok(v) => v,
                        Err(_) => return,
                    };
                let resp = match req {
                    FsRequest::ReadDir(d) => {
                        let mut entries = crate::NameModeMap::new();
                        entries.insert(d.name.trim_start_matches('/').to_string(), 0o644);
                        FsResponse::Dir(DirResponse { entries })
                    }
                    _ => FsResponse::Error("unexpected".into()),
                };
                frame_async::write_frame(&mut server_io, seq, &resp).await.unwrap();
            }
        });

        let client = RpcClient::new(Box::new(client_io));
        for name in ["/a", "/b"] {
            let resp: FsResponse = client
                .call(&FsRequest::ReadDir(DirRequest { name: name.into() }))
                .await
                .unwrap();
            match resp {
                FsResponse::Dir(d) => {
                    assert!(d.entries.contains_key(name.trim_start_matches('/')))
                }
                other => panic!("unexpected response {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn disconnect_surfaces_as_error() {
        let (client_io, server_io) = tokio::io::duplex(64);
        drop(server_io);
        let client = RpcClient::new(Box::new(client_io));
        let err = client.call::<_, FsResponse>(&ConnHello { id: "x".into() }).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
