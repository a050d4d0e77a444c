//! # termite-worker
//!
//! The worker daemon: accepts authenticated connections from masters,
//! pairs them into per-session mirrors, admits jobs under a global
//! concurrency bound, executes them against the remote filesystem view,
//! and reports itself to the coordinator.

mod coordinator;
mod daemon;
mod mirror;
mod pending;
mod sandbox;

pub use coordinator::periodic_report;
pub use daemon::{WorkerDaemon, WorkerOptions};
pub use mirror::Mirror;
pub use pending::PendingConnections;
pub use sandbox::WritableRoot;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("must ask positive job count")]
    NonPositiveJobCount,

    #[error("no processes available")]
    NoProcessesAvailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rpc(#[from] termite_proto::RpcError),

    #[error(transparent)]
    Cache(#[from] termite_cache::CacheError),

    #[error("mirror shut down")]
    MirrorClosed,
}
