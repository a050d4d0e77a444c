//! The filesystem service a master runs on each mirror's reverse
//! channel. One loop per connection; requests are answered in order.

use std::sync::Arc;

use tracing::debug;

use termite_cache::{ContentCache, ContentServer};
use termite_proto::{frame_async, AttrResponse, DirResponse, FsRequest, FsResponse, NetConn, RpcError};

use crate::AttrStore;

pub struct FsServer {
    store: Arc<AttrStore>,
    content: ContentServer,
}

impl FsServer {
    pub fn new(store: Arc<AttrStore>, cache: Arc<ContentCache>) -> Self {
        FsServer { store, content: ContentServer::new(cache) }
    }

    pub fn handle(&self, req: FsRequest) -> FsResponse {
        match req {
            FsRequest::GetAttr(req) => FsResponse::Attr(AttrResponse {
                attrs: self.store.get_attr(&req.name),
            }),
            FsRequest::ReadDir(req) => FsResponse::Dir(DirResponse {
                entries: self.store.read_dir(&req.name),
            }),
            FsRequest::FileContent(req) => match self.content.file_content(&req) {
                Ok(resp) => FsResponse::Content(resp),
                Err(err) => FsResponse::Error(err.to_string()),
            },
        }
    }

    /// Serve one reverse connection until the worker goes away.
    pub async fn serve(&self, conn: NetConn) -> Result<(), RpcError> {
        let mut stream = conn.stream;
        loop {
            let (seq, req): (u64, FsRequest) = match frame_async::read_frame(&mut stream).await {
                Ok(v) => v,
                Err(err) if err.is_disconnect() => {
                    debug!(peer = %conn.peer, "reverse channel closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            let resp = self.handle(req);
            frame_async::write_frame(&mut stream, seq, &resp).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use termite_proto::{AttrRequest, ContentRequest, DirRequest, Status};

    fn server() -> (FsServer, TempDir, TempDir) {
        let cache_dir = TempDir::new().unwrap();
        let tree = TempDir::new().unwrap();
        let cache = Arc::new(ContentCache::new(cache_dir.path()).unwrap());
        let store = Arc::new(AttrStore::new(cache.clone()));
        (FsServer::new(store, cache), cache_dir, tree)
    }

    #[test]
    fn getattr_then_content() {
        let (server, _cache_dir, tree) = server();
        let path = tree.path().join("obj.o");
        fs::write(&path, b"relocatable").unwrap();

        let resp = server.handle(FsRequest::GetAttr(AttrRequest {
            name: path.display().to_string(),
        }));
        let FsResponse::Attr(rep) = resp else { panic!("want attr response") };
        let hash = rep.attrs[0].hash.expect("file digested");

        let resp = server.handle(FsRequest::FileContent(ContentRequest {
            hash,
            start: 0,
            end: 11,
        }));
        let FsResponse::Content(rep) = resp else { panic!("want content response") };
        assert_eq!(rep.chunk, b"relocatable");
    }

    #[test]
    fn unknown_hash_is_an_error_response() {
        let (server, _cache_dir, _tree) = server();
        let resp = server.handle(FsRequest::FileContent(ContentRequest {
            hash: ContentCache::compute_hash(b"never seen"),
            start: 0,
            end: 4,
        }));
        assert!(matches!(resp, FsResponse::Error(_)));
    }

    #[test]
    fn readdir_lists_children() {
        let (server, _cache_dir, tree) = server();
        fs::write(tree.path().join("a.c"), b"a").unwrap();
        fs::create_dir(tree.path().join("sub")).unwrap();

        let resp = server.handle(FsRequest::ReadDir(DirRequest {
            name: tree.path().display().to_string(),
        }));
        let FsResponse::Dir(rep) = resp else { panic!("want dir response") };
        assert!(rep.entries.contains_key("a.c"));
        assert!(rep.entries.contains_key("sub"));
    }

    #[tokio::test]
    async fn serve_answers_a_reverse_connection() {
        let (server, _cache_dir, tree) = server();
        fs::write(tree.path().join("x.h"), b"hdr").unwrap();
        let server = Arc::new(server);

        let (mut worker_io, master_io) = tokio::io::duplex(1 << 16);
        let serving = {
            let server = server.clone();
            tokio::spawn(async move {
                server.serve(NetConn::new(master_io, "worker:1")).await
            })
        };

        let req = FsRequest::GetAttr(AttrRequest {
            name: tree.path().join("x.h").display().to_string(),
        });
        frame_async::write_frame(&mut worker_io, 3, &req).await.unwrap();
        let (seq, resp): (u64, FsResponse) =
            frame_async::read_frame(&mut worker_io).await.unwrap();
        assert_eq!(seq, 3);
        let FsResponse::Attr(rep) = resp else { panic!("want attr response") };
        assert!(rep.attrs[0].status.is_ok());

        // A worker going away ends the loop cleanly.
        drop(worker_io);
        serving.await.unwrap().unwrap();
    }

    #[test]
    fn negative_lookup_is_in_band() {
        let (server, _cache_dir, tree) = server();
        let resp = server.handle(FsRequest::GetAttr(AttrRequest {
            name: tree.path().join("ghost.h").display().to_string(),
        }));
        let FsResponse::Attr(rep) = resp else { panic!("want attr response") };
        assert_eq!(rep.attrs[0].status, Status::Noent);
    }
}
