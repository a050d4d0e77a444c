//! # termite-fs
//!
//! The read-only remote filesystem a worker serves to its jobs. Path
//! lookups, directory listings and file reads resolve against the
//! master over the mirror's reverse channel; responses are cached
//! locally and invalidated by master pushes.
//!
//! With the `fuse` feature on Linux the view can be mounted through
//! `fuser`; everywhere else the kernel adapter is a stub and the typed
//! API below is the interface.

mod client;
pub mod fuse;

pub use client::FsClient;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use termite_cache::{fetch_between_content_servers, CacheError, ContentCache};
use termite_proto::{
    has_dir_prefix, FileAttr, FileInfo, Hash, NameModeMap, Status, UpdateRequest,
};

pub struct RpcFs {
    cache: Arc<ContentCache>,
    client: Arc<FsClient>,

    /// Roots assumed shared between master and worker hosts; matching
    /// local files are indexed instead of fetched.
    local_roots: Vec<String>,

    // Lock order: `dirs` before `attrs` when both are held (update()).
    dirs: tokio::sync::Mutex<HashMap<String, NameModeMap>>,
    attrs: tokio::sync::RwLock<HashMap<String, Arc<FileAttr>>>,

    // At most one network fetch per hash; waiters re-check the cache on
    // every wake.
    fetch_inflight: std::sync::Mutex<HashSet<Hash>>,
    fetch_done: Notify,
}

/// Parent directory of a trimmed (no leading slash) path; `""` is the
/// root directory.
fn parent_dir(trimmed: &str) -> &str {
    match trimmed.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

impl RpcFs {
    pub fn new(client: Arc<FsClient>, cache: Arc<ContentCache>, local_roots: Vec<String>) -> Self {
        RpcFs {
            cache,
            client,
            local_roots,
            dirs: tokio::sync::Mutex::new(HashMap::new()),
            attrs: tokio::sync::RwLock::new(HashMap::new()),
            fetch_inflight: std::sync::Mutex::new(HashSet::new()),
            fetch_done: Notify::new(),
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Apply a batch of pushed attribute changes. The whole batch lands
    /// under both locks, so readers never observe a partial update.
    ///
    /// A deletion, or a replacement of a previously-known present entry,
    /// invalidates the parent's cached listing; a first-seen attribute
    /// does not.
    pub async fn update(&self, req: &UpdateRequest) {
        let mut dirs = self.dirs.lock().await;
        let mut attrs = self.attrs.write().await;

        let mut flush_dirs = Vec::new();
        for attr in &req.files {
            let trimmed = attr.trimmed_path().to_string();
            let existed_present = attrs
                .get(&trimmed)
                .map(|prev| prev.status != Status::Noent)
                .unwrap_or(false);
            if attr.deletion() || existed_present {
                flush_dirs.push(parent_dir(&trimmed).to_string());
            }
            attrs.insert(trimmed, Arc::new(attr.clone()));
        }
        for dir in flush_dirs {
            dirs.remove(&dir);
        }
    }

    /// Attribute lookup with a read-locked fast path. On a miss the
    /// write lock is held across the master RPC, so concurrent misses
    /// for the same path collapse into one call.
    pub async fn get_attr(&self, name: &str) -> Option<Arc<FileAttr>> {
        {
            let attrs = self.attrs.read().await;
            if let Some(attr) = attrs.get(name) {
                return Some(attr.clone());
            }
        }

        let mut attrs = self.attrs.write().await;
        if let Some(attr) = attrs.get(name) {
            return Some(attr.clone());
        }

        let abs = format!("/{name}");
        let rep = match self.client.get_attr(&abs).await {
            Ok(rep) => rep,
            Err(err) => {
                warn!(name, error = %err, "GetAttr failed");
                return None;
            }
        };

        let mut wanted = None;
        for attr in rep.attrs {
            if let Some(content) = &attr.content {
                if let Err(err) = self.cache.save(content) {
                    warn!(path = %attr.path, error = %err, "saving inline content failed");
                }
            }
            self.consider_save_local(&attr);
            let attr = Arc::new(attr);
            if attr.path == abs {
                wanted = Some(attr.clone());
            }
            attrs.insert(attr.trimmed_path().to_string(), attr);
        }
        wanted
    }

    /// If the master's attr names a regular file under one of our local
    /// roots and the local stat agrees with the master's, the bytes are
    /// already on this host; index them instead of fetching.
    fn consider_save_local(&self, attr: &FileAttr) {
        if !attr.status.is_ok() {
            return;
        }
        let Some(info) = &attr.info else { return };
        if !info.is_regular() {
            return;
        }
        if !self.local_roots.iter().any(|root| has_dir_prefix(&attr.path, root)) {
            return;
        }
        let Ok(meta) = std::fs::symlink_metadata(&attr.path) else { return };
        if FileInfo::from_metadata(&meta).encoded() != info.encoded() {
            return;
        }
        if let Err(err) = self.cache.save_immutable_path(Path::new(&attr.path)) {
            debug!(path = %attr.path, error = %err, "local save failed");
        }
    }

    /// Directory listing. Absence of an entry in the result is
    /// authoritative, not a hint.
    pub async fn open_dir(&self, name: &str) -> Result<NameModeMap, Status> {
        let mut dirs = self.dirs.lock().await;
        if let Some(entries) = dirs.get(name) {
            return Ok(entries.clone());
        }
        let abs = format!("/{name}");
        match self.client.read_dir(&abs).await {
            Ok(rep) => {
                dirs.insert(name.to_string(), rep.entries.clone());
                Ok(rep.entries)
            }
            Err(err) => {
                warn!(name, error = %err, "ReadDir failed");
                Err(Status::Noent)
            }
        }
    }

    /// Open a file for reading, fetching its content into the shared
    /// cache first if needed. Any write intent fails with `Perm`.
    pub async fn open(&self, name: &str, write: bool) -> Result<std::fs::File, Status> {
        if write {
            return Err(Status::Perm);
        }
        let Some(attr) = self.get_attr(name).await else { return Err(Status::Noent) };
        if !attr.status.is_ok() {
            return Err(attr.status);
        }
        let Some(info) = attr.info else { return Err(Status::Io) };
        let Some(hash) = attr.hash else { return Err(Status::Inval) };

        if !self.cache.has_hash(&hash) {
            debug!(name, "fetching contents");
            if self.fetch_hash(info.size, hash).await.is_err() {
                return Err(Status::Noent);
            }
        }
        std::fs::File::open(self.cache.path(&hash)).map_err(|_| Status::Io)
    }

    pub async fn readlink(&self, name: &str) -> Result<String, Status> {
        let Some(attr) = self.get_attr(name).await else { return Err(Status::Noent) };
        if !attr.status.is_ok() {
            return Err(attr.status);
        }
        match (&attr.info, &attr.link) {
            (Some(info), Some(link)) if info.is_symlink() => Ok(link.clone()),
            _ => Err(Status::Inval),
        }
    }

    /// Ensure `hash` is in the cache, fetching it from the master at
    /// most once no matter how many callers arrive concurrently.
    pub async fn fetch_hash(&self, size: u64, hash: Hash) -> Result<(), CacheError> {
        loop {
            let woken = self.fetch_done.notified();
            {
                let mut inflight = self.fetch_inflight.lock().unwrap();
                if self.cache.has_hash(&hash) {
                    return Ok(());
                }
                if !inflight.contains(&hash) {
                    inflight.insert(hash);
                    break;
                }
            }
            // Someone else is fetching this hash; wait for them and
            // re-check.
            woken.await;
        }

        let result =
            fetch_between_content_servers(self.client.as_ref(), size, hash, &self.cache).await;

        self.fetch_inflight.lock().unwrap().remove(&hash);
        self.fetch_done.notify_waiters();
        result
    }

    /// Attribute of the filesystem root, which always exists.
    pub fn root_info(&self) -> FileInfo {
        FileInfo {
            mode: libc::S_IFDIR | 0o755,
            size: 0,
            mtime: 0,
            uid: 0,
            gid: 0,
            dev: 0,
            ino: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_trimmed_paths() {
        assert_eq!(parent_dir("a/b/c"), "a/b");
        assert_eq!(parent_dir("top.c"), "");
        assert_eq!(parent_dir(""), "");
    }
}
