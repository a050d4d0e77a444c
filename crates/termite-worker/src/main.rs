use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use termite_config::Config;
use termite_worker::{WorkerDaemon, WorkerOptions};

#[derive(Parser)]
#[command(name = "termite-worker", version, about = "Termite worker daemon")]
struct Cli {
    /// TCP port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent jobs across all mirrors.
    #[arg(long)]
    jobs: Option<usize>,

    /// Content cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Scratch directory for running jobs.
    #[arg(long)]
    tmp_dir: Option<PathBuf>,

    /// File holding the cluster's shared secret.
    #[arg(long)]
    secret_file: Option<PathBuf>,

    /// Coordinator address (host:port); empty disables reporting.
    #[arg(long)]
    coordinator: Option<String>,

    /// Roots assumed shared with the master; matching local files are
    /// indexed instead of fetched. Repeatable.
    #[arg(long = "local-root")]
    local_roots: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    termite_config::logging::init();

    let cli = Cli::parse();
    let cfg = Config::load().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "config load failed, using defaults");
        Config::default()
    });

    let secret_file = cli.secret_file.unwrap_or_else(|| cfg.auth.secret_file.clone());
    let secret = std::fs::read(&secret_file)
        .with_context(|| format!("reading secret file {}", secret_file.display()))?;

    let mut local_roots = cfg.worker.local_roots.clone();
    local_roots.extend(cli.local_roots);

    let daemon = WorkerDaemon::new(WorkerOptions {
        secret,
        tmp_dir: cli.tmp_dir.unwrap_or_else(|| cfg.storage.tmp_dir.clone()),
        cache_dir: cli.cache_dir.unwrap_or_else(|| cfg.storage.cache_dir.clone()),
        jobs: cli.jobs.unwrap_or(cfg.worker.jobs),
        local_roots,
    })?;

    let port = cli.port.unwrap_or(cfg.worker.port);
    let coordinator = cli
        .coordinator
        .or_else(|| {
            if cfg.worker.coordinator.is_empty() {
                None
            } else {
                Some(cfg.worker.coordinator.clone())
            }
        })
        .filter(|c| !c.is_empty());
    if coordinator.is_none() {
        tracing::info!("no coordinator configured, skipping periodic reports");
    }

    daemon.run(port, coordinator).await?;
    Ok(())
}
