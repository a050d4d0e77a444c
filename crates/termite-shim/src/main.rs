use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use termite_proto::{frame, LocalRequest, LocalResponse, WorkRequest};
use termite_shim::{discover_socket, resolve_binary, SOCKET_ENV};

fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().collect();
    let base = Path::new(&args[0])
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let path_env = std::env::var("PATH").unwrap_or_default();
    let Some(binary) = resolve_binary(&path_env, &base) else {
        bail!("could not find {base} on PATH");
    };
    args[0] = binary.display().to_string();

    let cwd = std::env::current_dir().context("getting working directory")?;
    let socket = match std::env::var(SOCKET_ENV) {
        Ok(path) => PathBuf::from(path),
        Err(_) => discover_socket(&cwd)
            .context("no .termite-socket found here or in any parent directory")?,
    };

    let request = WorkRequest {
        prefetch: Vec::new(),
        stdin_id: String::new(),
        debug: false,
        writable_root: String::new(),
        binary: binary.display().to_string(),
        argv: args,
        env: std::env::vars().map(|(k, v)| format!("{k}={v}")).collect(),
        dir: cwd.display().to_string(),
    };

    let mut stream = UnixStream::connect(&socket)
        .with_context(|| format!("dialing {}", socket.display()))?;
    frame::write_frame(&mut stream, 0, &LocalRequest::Run(request))
        .context("sending work request")?;
    let (_seq, response): (u64, LocalResponse) =
        frame::read_frame(&mut stream).context("reading work reply")?;

    match response {
        LocalResponse::Done(reply) => {
            std::io::stdout().write_all(&reply.stdout)?;
            std::io::stderr().write_all(&reply.stderr)?;
            std::process::exit(reply.exit);
        }
        LocalResponse::Error(err) => bail!("master refused the job: {err}"),
    }
}
