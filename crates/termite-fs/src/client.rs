//! Typed client for the reverse channel: the worker calling back into
//! the master's filesystem service.

use termite_proto::{
    AsyncConn, AttrRequest, AttrResponse, ContentRequest, ContentResponse, DirRequest,
    DirResponse, FsRequest, FsResponse, RpcClient, RpcError,
};

use termite_cache::ChunkSource;

pub struct FsClient {
    rpc: RpcClient,
}

impl FsClient {
    pub fn new(conn: Box<dyn AsyncConn>) -> Self {
        FsClient { rpc: RpcClient::new(conn) }
    }

    pub async fn get_attr(&self, name: &str) -> Result<AttrResponse, RpcError> {
        let req = FsRequest::GetAttr(AttrRequest { name: name.to_string() });
        match self.rpc.call(&req).await? {
            FsResponse::Attr(rep) => Ok(rep),
            FsResponse::Error(e) => Err(RpcError::Remote(e)),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub async fn read_dir(&self, name: &str) -> Result<DirResponse, RpcError> {
        let req = FsRequest::ReadDir(DirRequest { name: name.to_string() });
        match self.rpc.call(&req).await? {
            FsResponse::Dir(rep) => Ok(rep),
            FsResponse::Error(e) => Err(RpcError::Remote(e)),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub async fn file_content(&self, req: ContentRequest) -> Result<ContentResponse, RpcError> {
        match self.rpc.call(&FsRequest::FileContent(req)).await? {
            FsResponse::Content(rep) => Ok(rep),
            FsResponse::Error(e) => Err(RpcError::Remote(e)),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }
}

impl ChunkSource for FsClient {
    fn chunk(
        &self,
        req: ContentRequest,
    ) -> impl std::future::Future<Output = Result<ContentResponse, RpcError>> + Send {
        self.file_content(req)
    }
}
