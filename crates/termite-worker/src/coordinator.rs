//! Best-effort liveness reporting to the coordinator. Failures are
//! logged and the loop keeps going; discovery degrades, execution does
//! not.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use termite_proto::{
    frame_async, CoordinatorRequest, CoordinatorResponse, Registration, RpcError,
};

use crate::daemon::WorkerDaemon;

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Register this worker with the coordinator immediately, then every
/// 60 seconds.
pub async fn periodic_report(daemon: Arc<WorkerDaemon>, coordinator: String, port: u16) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        ticker.tick().await;
        match report(&coordinator, port).await {
            Ok(known) => debug!(
                coordinator = %coordinator,
                known,
                reserved = daemon.reserved_jobs(),
                "registered"
            ),
            Err(err) => warn!(coordinator = %coordinator, error = %err, "report failed"),
        }
    }
}

async fn report(coordinator: &str, port: u16) -> Result<u32, RpcError> {
    let mut stream = TcpStream::connect(coordinator).await?;

    let hostname = nix::unistd::gethostname()
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
    let hostname = hostname.to_string_lossy();

    let registration = Registration {
        address: format!("{hostname}:{port}"),
        name: format!("{hostname}:{port}"),
        version: termite_proto::version().to_string(),
        http_status_address: None,
    };
    frame_async::write_frame(&mut stream, 0, &CoordinatorRequest::Register(registration)).await?;
    let (_seq, resp): (u64, CoordinatorResponse) = frame_async::read_frame(&mut stream).await?;
    match resp {
        CoordinatorResponse::Registered(known) => Ok(known),
        CoordinatorResponse::Error(e) => Err(RpcError::Remote(e)),
    }
}
