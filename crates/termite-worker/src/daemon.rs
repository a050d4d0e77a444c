//! The worker daemon: owns the shared content cache, admits mirrors
//! under the global job bound, and runs the authenticated accept loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use termite_cache::{ContentCache, ContentServer};
use termite_proto::{
    auth, frame_async, AsyncConn, ConnHello, CreateMirrorRequest, CreateMirrorResponse,
    DaemonRequest, DaemonResponse, NetConn,
};

use crate::mirror::Mirror;
use crate::pending::PendingConnections;
use crate::{coordinator, WorkerError};

pub struct WorkerOptions {
    pub secret: Vec<u8>,
    pub tmp_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub jobs: usize,
    pub local_roots: Vec<String>,
}

pub struct WorkerDaemon {
    secret: Vec<u8>,
    tmp_dir: PathBuf,
    cache: Arc<ContentCache>,
    content_server: ContentServer,
    max_job_count: usize,
    local_roots: Vec<String>,
    pending: PendingConnections,
    mirrors: Mutex<HashMap<String, Arc<Mirror>>>,
}

impl WorkerDaemon {
    pub fn new(opts: WorkerOptions) -> Result<Arc<Self>, WorkerError> {
        let cache = Arc::new(ContentCache::new(&opts.cache_dir)?);
        std::fs::create_dir_all(&opts.tmp_dir)?;
        Ok(Arc::new(WorkerDaemon {
            secret: opts.secret,
            tmp_dir: opts.tmp_dir,
            content_server: ContentServer::new(cache.clone()),
            cache,
            max_job_count: opts.jobs,
            local_roots: opts.local_roots,
            pending: PendingConnections::new(),
            mirrors: Mutex::new(HashMap::new()),
        }))
    }

    pub fn pending(&self) -> &PendingConnections {
        &self.pending
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Job slots reserved across all live mirrors.
    pub fn reserved_jobs(&self) -> usize {
        self.mirrors.lock().unwrap().values().map(|m| m.max_job_count()).sum()
    }

    /// Pair the two labelled connections into a mirror and reserve job
    /// slots for it. Grants `min(remaining, requested)`; a worker at
    /// capacity refuses with *no processes available*.
    pub async fn create_mirror(
        self: &Arc<Self>,
        req: &CreateMirrorRequest,
    ) -> Result<CreateMirrorResponse, WorkerError> {
        if req.max_job_count == 0 {
            return Err(WorkerError::NonPositiveJobCount);
        }
        let rpc_conn = self.pending.wait_connection(&req.rpc_id).await;
        let rev_conn = self.pending.wait_connection(&req.rev_rpc_id).await;
        let key = rpc_conn.peer.clone();

        let (mirror, granted) = {
            let mut mirrors = self.mirrors.lock().unwrap();
            let used: usize = mirrors.values().map(|m| m.max_job_count()).sum();
            let remaining = self.max_job_count.saturating_sub(used);
            if remaining == 0 {
                // Dropping the connections closes them.
                return Err(WorkerError::NoProcessesAvailable);
            }
            let granted = remaining.min(req.max_job_count);
            let mirror = Mirror::new(
                key.clone(),
                granted,
                &req.writable_root,
                &self.tmp_dir,
                rev_conn,
                self.cache.clone(),
                self.local_roots.clone(),
                Arc::downgrade(self),
            )?;
            mirrors.insert(key.clone(), mirror.clone());
            (mirror, granted)
        };

        info!(key = %key, granted, "created mirror");
        tokio::spawn(mirror.serve(rpc_conn));
        Ok(CreateMirrorResponse { granted_job_count: granted })
    }

    pub fn drop_mirror(&self, key: &str) {
        let mut mirrors = self.mirrors.lock().unwrap();
        if mirrors.remove(key).is_some() {
            info!(key, "mirror removed");
        }
    }

    /// Accept loop plus coordinator reporter. Runs until ctrl-c.
    pub async fn run(
        self: Arc<Self>,
        port: u16,
        coordinator: Option<String>,
    ) -> Result<(), WorkerError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "worker listening");
        if let Some(coordinator) = coordinator {
            tokio::spawn(coordinator::periodic_report(self.clone(), coordinator, port));
        }
        self.serve(listener).await
    }

    /// Accept loop over an existing listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), WorkerError> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let daemon = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = daemon.handle_connection(stream, peer.to_string()).await {
                            debug!(peer = %peer, error = %err, "connection ended");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        mut stream: TcpStream,
        peer: String,
    ) -> Result<(), WorkerError> {
        // Authentication failures close the connection before it
        // reaches any service.
        auth::authenticate(&mut stream, &self.secret).await?;
        let mut boxed: Box<dyn AsyncConn> = Box::new(stream);
        let (_seq, hello): (u64, ConnHello) = frame_async::read_frame(&mut boxed).await?;
        info!(peer = %peer, id = %hello.id, "authenticated connection");

        match self.pending.accept(&hello.id, NetConn { stream: boxed, peer }) {
            None => Ok(()),
            Some(conn) => self.serve_daemon_rpc(conn).await,
        }
    }

    /// General RPC service for connections no rendezvous claimed.
    async fn serve_daemon_rpc(self: Arc<Self>, conn: NetConn) -> Result<(), WorkerError> {
        let mut stream = conn.stream;
        loop {
            let (seq, req): (u64, DaemonRequest) = match frame_async::read_frame(&mut stream).await
            {
                Ok(v) => v,
                Err(err) if err.is_disconnect() => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            let resp = match req {
                DaemonRequest::CreateMirror(req) => match self.create_mirror(&req).await {
                    Ok(rep) => DaemonResponse::MirrorCreated(rep),
                    Err(err) => DaemonResponse::Error(err.to_string()),
                },
                DaemonRequest::FileContent(req) => match self.content_server.file_content(&req) {
                    Ok(rep) => DaemonResponse::Content(rep),
                    Err(err) => DaemonResponse::Error(err.to_string()),
                },
                DaemonRequest::DropMirror { key } => {
                    self.drop_mirror(&key);
                    DaemonResponse::MirrorDropped
                }
            };
            frame_async::write_frame(&mut stream, seq, &resp).await?;
        }
    }
}
