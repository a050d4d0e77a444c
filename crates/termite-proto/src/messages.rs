//! Request and response types for the five Termite services: the worker
//! daemon, per-mirror forward channel, the master's reverse filesystem
//! channel, the coordinator, and the shim-facing local master.

use serde::{Deserialize, Serialize};

use crate::attr::{FileAttr, Hash, NameModeMap};

/// Sent once per connection, immediately after authentication. A
/// non-empty id routes the connection into the PendingConnections
/// rendezvous; an empty id marks a general RPC connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnHello {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrRequest {
    /// Absolute path, leading slash.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrResponse {
    /// The requested path plus opportunistically prefetched entries.
    pub attrs: Vec<FileAttr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirRequest {
    pub name: String,
}

/// Authoritative listing of one directory at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirResponse {
    pub entries: NameModeMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
    pub hash: Hash,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResponse {
    pub chunk: Vec<u8>,
}

/// A batch of attribute changes pushed from master to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub files: Vec<FileAttr>,
}

/// One dispatched command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    /// Attribute warm-up applied to the mirror's filesystem view before
    /// the command runs.
    pub prefetch: Vec<FileAttr>,
    /// Id of the connection streaming stdin; empty for no stdin.
    pub stdin_id: String,
    pub debug: bool,
    pub writable_root: String,
    pub binary: String,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub dir: String,
}

impl WorkRequest {
    pub fn summary(&self) -> String {
        format!("stdin {} cmd {:?}", self.stdin_id, self.argv)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkReply {
    /// Exit status of the process. A non-zero exit is not an RPC error.
    pub exit: i32,
    /// Mutations observed under the writable root.
    pub files: Vec<FileAttr>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMirrorRequest {
    pub rpc_id: String,
    pub rev_rpc_id: String,
    pub writable_root: String,
    /// Number of job slots to reserve.
    pub max_job_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMirrorResponse {
    pub granted_job_count: usize,
}

/// What a worker publishes to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub address: String,
    pub name: String,
    pub version: String,
    pub http_status_address: Option<String>,
}

/// General RPC connections to the worker daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonRequest {
    CreateMirror(CreateMirrorRequest),
    FileContent(ContentRequest),
    DropMirror { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonResponse {
    MirrorCreated(CreateMirrorResponse),
    Content(ContentResponse),
    MirrorDropped,
    Error(String),
}

/// The forward channel of a mirror, master to worker. `Run` responses
/// are matched by sequence id so jobs overlap; `Update` is handled
/// inline so pushes apply in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MirrorRequest {
    Run(WorkRequest),
    Update(UpdateRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MirrorResponse {
    Done(WorkReply),
    Updated,
    Error(String),
}

/// The reverse channel, worker to master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FsRequest {
    GetAttr(AttrRequest),
    ReadDir(DirRequest),
    FileContent(ContentRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FsResponse {
    Attr(AttrResponse),
    Dir(DirResponse),
    Content(ContentResponse),
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinatorRequest {
    Register(Registration),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinatorResponse {
    /// Number of workers the coordinator currently knows about.
    Registered(u32),
    Error(String),
}

/// The shim-facing service on the master's unix socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocalRequest {
    Run(WorkRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocalResponse {
    Done(WorkReply),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_request_summary_names_command() {
        let req = WorkRequest {
            prefetch: vec![],
            stdin_id: "s1".into(),
            debug: false,
            writable_root: "/build".into(),
            binary: "/usr/bin/gcc".into(),
            argv: vec!["gcc".into(), "-c".into(), "x.c".into()],
            env: vec![],
            dir: "/build".into(),
        };
        let s = req.summary();
        assert!(s.contains("s1"));
        assert!(s.contains("gcc"));
    }
}
