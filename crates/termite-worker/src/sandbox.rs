//! The writable layer of a mirror: a scratch directory standing in for
//! the session's writable root, and the before/after scan that turns
//! its mutations into a FileAttr delta.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;
use walkdir::WalkDir;

use termite_cache::ContentCache;
use termite_proto::{FileAttr, FileInfo};

static NEXT_JOB_DIR: AtomicU64 = AtomicU64::new(0);

/// Scratch directory backing one mirror's writable root. Paths in the
/// delta are reported under the virtual root, not the scratch location.
pub struct WritableRoot {
    root: String,
    scratch: PathBuf,
}

impl WritableRoot {
    pub fn materialize(tmp_dir: &Path, writable_root: &str) -> io::Result<Self> {
        let id = NEXT_JOB_DIR.fetch_add(1, Ordering::Relaxed);
        let scratch = tmp_dir.join(format!("mirror.{}.{}", std::process::id(), id));
        fs::create_dir_all(&scratch)?;
        Ok(WritableRoot { root: writable_root.trim_end_matches('/').to_string(), scratch })
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Where a command asking for `dir` actually runs: inside the
    /// scratch tree when `dir` lies under the writable root, verbatim
    /// otherwise.
    pub fn working_dir(&self, dir: &str) -> PathBuf {
        if termite_proto::has_dir_prefix(dir, &self.root) {
            let rest = dir[self.root.len()..].trim_start_matches('/');
            self.scratch.join(rest)
        } else {
            PathBuf::from(dir)
        }
    }

    /// Snapshot the scratch layer: virtual path → FileInfo.
    pub fn snapshot(&self) -> HashMap<String, FileInfo> {
        let mut state = HashMap::new();
        for entry in WalkDir::new(&self.scratch).min_depth(1).into_iter().flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if let Some(virt) = self.virtual_path(entry.path()) {
                state.insert(virt, FileInfo::from_metadata(&meta));
            }
        }
        state
    }

    /// Compare the current scratch layer against `pre`, digesting new
    /// and changed file content into `cache`. Entries that vanished
    /// become negative attrs.
    pub fn delta(&self, pre: &HashMap<String, FileInfo>, cache: &ContentCache) -> Vec<FileAttr> {
        let post = self.snapshot();
        let mut files = Vec::new();

        for (virt, info) in &post {
            if pre.get(virt).map(|old| old.encoded()) == Some(info.encoded()) {
                continue;
            }
            let mut attr = FileAttr::new_ok(virt.clone(), *info);
            let real = self.real_path(virt);
            if info.is_regular() {
                let saved = fs::File::open(&real)
                    .map_err(termite_cache::CacheError::from)
                    .and_then(|f| cache.save_stream(f));
                match saved {
                    Ok(hash) => attr.hash = Some(hash),
                    Err(err) => {
                        warn!(path = %real.display(), error = %err, "digesting output failed");
                        continue;
                    }
                }
            } else if info.is_symlink() {
                attr.link = fs::read_link(&real)
                    .ok()
                    .map(|t| t.to_string_lossy().into_owned());
            }
            files.push(attr);
        }

        for virt in pre.keys() {
            if !post.contains_key(virt) {
                files.push(FileAttr::negative(virt.clone()));
            }
        }
        files
    }

    fn virtual_path(&self, real: &Path) -> Option<String> {
        let rel = real.strip_prefix(&self.scratch).ok()?;
        Some(format!("{}/{}", self.root, rel.display()))
    }

    fn real_path(&self, virt: &str) -> PathBuf {
        let rel = virt
            .strip_prefix(&self.root)
            .unwrap_or(virt)
            .trim_start_matches('/');
        self.scratch.join(rel)
    }
}

impl Drop for WritableRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.scratch);
    }
}
