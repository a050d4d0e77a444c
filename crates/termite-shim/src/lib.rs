//! # termite-shim
//!
//! The binary a developer's build invokes in place of the real tool
//! (installed as `gcc`, `ld`, … inside a directory named `termite` on
//! PATH). It resolves the real binary, forwards the invocation to the
//! master over its unix socket, and relays the result.

use std::path::{Path, PathBuf};

/// Socket filename placed at or above the build root.
pub const SOCKET_FILE: &str = ".termite-socket";

/// Environment override for the socket location.
pub const SOCKET_ENV: &str = "TERMITE_SOCKET";

/// Find the real `base` binary on `path_env`, skipping any directory
/// whose basename is `termite` — those hold shims, and resolving into
/// them would dispatch the dispatch.
pub fn resolve_binary(path_env: &str, base: &str) -> Option<PathBuf> {
    for dir in std::env::split_paths(path_env) {
        if dir.file_name().map(|name| name == "termite").unwrap_or(false) {
            continue;
        }
        let candidate = dir.join(base);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Walk from `cwd` to the filesystem root looking for a
/// `.termite-socket` that is actually a unix socket.
pub fn discover_socket(cwd: &Path) -> Option<PathBuf> {
    let mut dir = Some(cwd);
    while let Some(current) = dir {
        let candidate = current.join(SOCKET_FILE);
        if is_socket(&candidate) {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_socket())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    #[test]
    fn resolve_skips_termite_directories() {
        let temp = TempDir::new().unwrap();
        let shim_dir = temp.path().join("termite");
        let real_dir = temp.path().join("usr-bin");
        fs::create_dir_all(&shim_dir).unwrap();
        fs::create_dir_all(&real_dir).unwrap();
        fs::write(shim_dir.join("gcc"), b"#!shim").unwrap();
        fs::write(real_dir.join("gcc"), b"#!real").unwrap();

        let path_env = format!("{}:{}", shim_dir.display(), real_dir.display());
        let resolved = resolve_binary(&path_env, "gcc").expect("found");
        assert_eq!(resolved, real_dir.join("gcc"));
    }

    #[test]
    fn resolve_fails_when_only_shims_exist() {
        let temp = TempDir::new().unwrap();
        let shim_dir = temp.path().join("termite");
        fs::create_dir_all(&shim_dir).unwrap();
        fs::write(shim_dir.join("gcc"), b"#!shim").unwrap();

        assert_eq!(resolve_binary(&shim_dir.display().to_string(), "gcc"), None);
    }

    #[test]
    fn socket_is_found_in_an_ancestor() {
        let temp = TempDir::new().unwrap();
        let _listener = UnixListener::bind(temp.path().join(SOCKET_FILE)).unwrap();
        let nested = temp.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        let found = discover_socket(&nested).expect("socket discovered");
        assert_eq!(found, temp.path().join(SOCKET_FILE));
    }

    #[test]
    fn plain_file_is_not_a_socket() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(SOCKET_FILE), b"decoy").unwrap();
        let nested = temp.path().join("a");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(discover_socket(&nested), None);
    }
}
