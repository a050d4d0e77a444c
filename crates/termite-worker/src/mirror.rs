//! A mirror: one master's session on this worker. Owns the forward
//! service loop, the remote filesystem view wired to the reverse
//! channel, a reserved slice of the worker's job capacity, and the
//! writable scratch layer.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Weak};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use termite_cache::ContentCache;
use termite_fs::{FsClient, RpcFs};
use termite_proto::{
    frame_async, trim, MirrorRequest, MirrorResponse, NetConn, UpdateRequest, WorkReply,
    WorkRequest,
};

use crate::daemon::WorkerDaemon;
use crate::sandbox::WritableRoot;
use crate::WorkerError;

pub struct Mirror {
    key: String,
    max_job_count: usize,
    job_slots: Semaphore,
    writable: WritableRoot,
    rpc_fs: Arc<RpcFs>,
    cache: Arc<ContentCache>,
    daemon: Weak<WorkerDaemon>,
    #[cfg(feature = "fuse")]
    _mount: Option<termite_fs::fuse::MountGuard>,
}

impl Mirror {
    pub(crate) fn new(
        key: String,
        granted: usize,
        writable_root: &str,
        tmp_dir: &Path,
        rev_conn: NetConn,
        cache: Arc<ContentCache>,
        local_roots: Vec<String>,
        daemon: Weak<WorkerDaemon>,
    ) -> Result<Arc<Self>, WorkerError> {
        let fs_client = Arc::new(FsClient::new(rev_conn.stream));
        let rpc_fs = Arc::new(RpcFs::new(fs_client, cache.clone(), local_roots));
        let writable = WritableRoot::materialize(tmp_dir, writable_root)?;

        // Expose the remote view to the job through the kernel when we
        // can; jobs fall back to master-pushed prefetch state otherwise.
        #[cfg(feature = "fuse")]
        let mount = {
            let mut mount_name = writable.scratch().as_os_str().to_owned();
            mount_name.push(".mnt");
            let mount_point = std::path::PathBuf::from(mount_name);
            std::fs::create_dir_all(&mount_point)?;
            match termite_fs::fuse::mount(
                rpc_fs.clone(),
                &mount_point,
                tokio::runtime::Handle::current(),
            ) {
                Ok(guard) => Some(guard),
                Err(err) => {
                    warn!(key = %key, error = %err, "mounting remote view failed");
                    None
                }
            }
        };

        Ok(Arc::new(Mirror {
            key,
            max_job_count: granted,
            job_slots: Semaphore::new(granted),
            writable,
            rpc_fs,
            cache,
            daemon,
            #[cfg(feature = "fuse")]
            _mount: mount,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Job slots this mirror reserved out of the worker's capacity.
    pub fn max_job_count(&self) -> usize {
        self.max_job_count
    }

    pub fn rpc_fs(&self) -> &Arc<RpcFs> {
        &self.rpc_fs
    }

    /// Execute one command under a job slot. Blocks while all granted
    /// slots are busy; the grant is a hard cap.
    pub async fn run(&self, req: WorkRequest) -> Result<WorkReply, WorkerError> {
        let _slot = self
            .job_slots
            .acquire()
            .await
            .map_err(|_| WorkerError::MirrorClosed)?;
        debug!(key = %self.key, "{}", req.summary());

        if !req.prefetch.is_empty() {
            self.rpc_fs
                .update(&UpdateRequest { files: req.prefetch.clone() })
                .await;
        }

        let pre = self.writable.snapshot();
        let working_dir = self.writable.working_dir(&req.dir);
        std::fs::create_dir_all(&working_dir)?;

        let mut cmd = tokio::process::Command::new(&req.binary);
        if req.argv.len() > 1 {
            cmd.args(&req.argv[1..]);
        }
        cmd.env_clear();
        for pair in &req.env {
            if let Some((k, v)) = pair.split_once('=') {
                cmd.env(k, v);
            }
        }
        cmd.current_dir(&working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if req.stdin_id.is_empty() { Stdio::null() } else { Stdio::piped() });

        let mut child = cmd.spawn()?;

        if !req.stdin_id.is_empty() {
            if let (Some(daemon), Some(mut child_stdin)) =
                (self.daemon.upgrade(), child.stdin.take())
            {
                let stdin_id = req.stdin_id.clone();
                tokio::spawn(async move {
                    let conn = daemon.pending().wait_connection(&stdin_id).await;
                    let mut stream = conn.stream;
                    if let Err(err) = tokio::io::copy(&mut stream, &mut child_stdin).await {
                        debug!(id = %stdin_id, error = %err, "stdin stream ended");
                    }
                });
            }
        }

        let output = child.wait_with_output().await?;
        let exit = exit_code(&output.status);
        let files = self.writable.delta(&pre, &self.cache);

        debug!(
            key = %self.key,
            exit,
            changed = files.len(),
            stdout = %String::from_utf8_lossy(trim(&output.stdout)),
            stderr = %String::from_utf8_lossy(trim(&output.stderr)),
            "job finished"
        );

        Ok(WorkReply { exit, files, stdout: output.stdout, stderr: output.stderr })
    }

    /// Serve the forward channel until the master goes away. `Update`
    /// pushes are applied inline, preserving arrival order; `Run`
    /// requests overlap up to the granted slot count, with responses
    /// matched by sequence id.
    pub async fn serve(self: Arc<Self>, conn: NetConn) {
        let (mut reader, writer) = tokio::io::split(conn.stream);
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        loop {
            let (seq, req): (u64, MirrorRequest) = match frame_async::read_frame(&mut reader).await
            {
                Ok(v) => v,
                Err(err) => {
                    if err.is_disconnect() {
                        debug!(key = %self.key, "forward channel closed");
                    } else {
                        warn!(key = %self.key, error = %err, "forward channel failed");
                    }
                    break;
                }
            };
            match req {
                MirrorRequest::Update(update) => {
                    self.rpc_fs.update(&update).await;
                    let mut writer = writer.lock().await;
                    if frame_async::write_frame(&mut *writer, seq, &MirrorResponse::Updated)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                MirrorRequest::Run(work) => {
                    let mirror = self.clone();
                    let writer = writer.clone();
                    tokio::spawn(async move {
                        let resp = match mirror.run(work).await {
                            Ok(reply) => MirrorResponse::Done(reply),
                            Err(err) => MirrorResponse::Error(err.to_string()),
                        };
                        let mut writer = writer.lock().await;
                        if let Err(err) =
                            frame_async::write_frame(&mut *writer, seq, &resp).await
                        {
                            warn!(key = %mirror.key, error = %err, "reply write failed");
                        }
                    });
                }
            }
        }

        if let Some(daemon) = self.daemon.upgrade() {
            info!(key = %self.key, "dropping mirror");
            daemon.drop_mirror(&self.key);
        }
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
