//! The authoritative path → FileAttr map over the master's tree.
//!
//! Entries are populated lazily from the local filesystem, digested into
//! the shared content cache, and overwritten by the deltas workers
//! report after each job. Negative entries are cached so repeated
//! lookups of missing headers stay local.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use termite_cache::ContentCache;
use termite_proto::{FileAttr, FileInfo, NameModeMap, Status};

use crate::shell::detect_files;

/// Files at or below this size ride along inside the attribute response,
/// saving the worker a content round-trip.
pub const INLINE_CONTENT_MAX: u64 = 32 << 10;

pub struct AttrStore {
    cache: Arc<ContentCache>,
    attrs: RwLock<HashMap<String, Arc<FileAttr>>>,
}

impl AttrStore {
    pub fn new(cache: Arc<ContentCache>) -> Self {
        AttrStore { cache, attrs: RwLock::new(HashMap::new()) }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Attributes for `name` plus its ancestor directories, requested
    /// path first. The ancestors ride along so one lookup warms the
    /// worker's path walk.
    pub fn get_attr(&self, name: &str) -> Vec<FileAttr> {
        let mut out = vec![(*self.lookup(name)).clone()];
        let mut current = name;
        while let Some((parent, _)) = current.rsplit_once('/') {
            let parent = if parent.is_empty() { "/" } else { parent };
            if parent == current {
                break;
            }
            out.push((*self.lookup(parent)).clone());
            current = parent;
        }
        out
    }

    /// The cached listing of one directory; empty for anything that is
    /// not a readable directory.
    pub fn read_dir(&self, name: &str) -> NameModeMap {
        let attr = self.lookup(name);
        attr.entries.clone().unwrap_or_default()
    }

    /// Apply a worker-reported delta to the authoritative map, saving
    /// any inline content, and return the batch for fan-out to the
    /// other mirrors.
    pub fn apply_delta(&self, files: &[FileAttr]) -> Vec<FileAttr> {
        let mut attrs = self.attrs.write().unwrap();
        for attr in files {
            if let Some(content) = &attr.content {
                if let Err(err) = self.cache.save(content) {
                    warn!(path = %attr.path, error = %err, "saving delta content failed");
                }
            }
            debug!(path = %attr.path, status = ?attr.status, "delta applied");
            attrs.insert(attr.path.clone(), Arc::new(attr.clone()));
        }
        files.to_vec()
    }

    /// Attributes to ship as a `WorkRequest` prefetch: every path in the
    /// command line that lies under `root`.
    pub fn prefetch_for_command(&self, root: &str, command: &str) -> Vec<FileAttr> {
        detect_files(root, command)
            .iter()
            .map(|path| (*self.lookup(path)).clone())
            .collect()
    }

    fn lookup(&self, name: &str) -> Arc<FileAttr> {
        {
            let attrs = self.attrs.read().unwrap();
            if let Some(attr) = attrs.get(name) {
                return attr.clone();
            }
        }
        let mut attrs = self.attrs.write().unwrap();
        if let Some(attr) = attrs.get(name) {
            return attr.clone();
        }
        let attr = Arc::new(self.stat_path(name));
        attrs.insert(name.to_string(), attr.clone());
        attr
    }

    fn stat_path(&self, name: &str) -> FileAttr {
        let meta = match fs::symlink_metadata(name) {
            Ok(meta) => meta,
            Err(_) => return FileAttr::negative(name),
        };
        let info = FileInfo::from_metadata(&meta);
        let mut attr = FileAttr::new_ok(name, info);

        if info.is_dir() {
            attr.entries = Some(Self::list_dir(name));
        } else if info.is_symlink() {
            match fs::read_link(name) {
                Ok(target) => attr.link = Some(target.to_string_lossy().into_owned()),
                Err(err) => {
                    warn!(path = name, error = %err, "readlink failed");
                    attr.status = Status::Io;
                    attr.info = None;
                }
            }
        } else if info.is_regular() {
            match self.cache.save_immutable_path(name) {
                Ok(hash) => {
                    attr.hash = Some(hash);
                    if info.size <= INLINE_CONTENT_MAX {
                        attr.content = fs::read(name).ok();
                    }
                }
                Err(err) => {
                    warn!(path = name, error = %err, "digest failed");
                    attr.status = Status::Io;
                    attr.info = None;
                }
            }
        }
        attr
    }

    fn list_dir(name: &str) -> NameModeMap {
        use std::os::unix::fs::MetadataExt;
        let mut entries = NameModeMap::new();
        let Ok(iter) = fs::read_dir(name) else { return entries };
        for entry in iter.flatten() {
            let Ok(meta) = entry.path().symlink_metadata() else { continue };
            entries.insert(entry.file_name().to_string_lossy().into_owned(), meta.mode());
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn store() -> (AttrStore, TempDir, TempDir) {
        let cache_dir = TempDir::new().unwrap();
        let tree = TempDir::new().unwrap();
        let cache = Arc::new(ContentCache::new(cache_dir.path()).unwrap());
        (AttrStore::new(cache), cache_dir, tree)
    }

    #[test]
    fn regular_file_gets_hash_and_inline_content() {
        let (store, _cache_dir, tree) = store();
        let path = tree.path().join("small.c");
        fs::write(&path, b"int x;").unwrap();

        let attrs = store.get_attr(&path.display().to_string());
        let attr = &attrs[0];
        assert!(attr.status.is_ok());
        assert_eq!(attr.hash, Some(ContentCache::compute_hash(b"int x;")));
        assert_eq!(attr.content.as_deref(), Some(&b"int x;"[..]));
        assert!(store.cache().has_hash(&attr.hash.unwrap()));
    }

    #[test]
    fn large_file_is_not_inlined() {
        let (store, _cache_dir, tree) = store();
        let path = tree.path().join("big.bin");
        fs::write(&path, vec![7u8; (INLINE_CONTENT_MAX + 1) as usize]).unwrap();

        let attrs = store.get_attr(&path.display().to_string());
        assert!(attrs[0].hash.is_some());
        assert!(attrs[0].content.is_none());
    }

    #[test]
    fn missing_path_is_negative_and_cached() {
        let (store, _cache_dir, tree) = store();
        let path = tree.path().join("nope.h").display().to_string();

        let attrs = store.get_attr(&path);
        assert_eq!(attrs[0].status, Status::Noent);

        // A second lookup is answered from the map even after the file
        // appears: the store is authoritative until told otherwise.
        fs::write(tree.path().join("nope.h"), b"late").unwrap();
        assert_eq!(store.get_attr(&path)[0].status, Status::Noent);
    }

    #[test]
    fn ancestors_ride_along() {
        let (store, _cache_dir, tree) = store();
        let sub = tree.path().join("src");
        fs::create_dir(&sub).unwrap();
        let file = sub.join("a.c");
        fs::write(&file, b"a").unwrap();

        let attrs = store.get_attr(&file.display().to_string());
        assert_eq!(attrs[0].path, file.display().to_string());
        let paths: Vec<&str> = attrs.iter().map(|a| a.path.as_str()).collect();
        assert!(paths.contains(&sub.display().to_string().as_str()));
        assert!(paths.contains(&"/"));

        let dir_attr = attrs.iter().find(|a| a.path == sub.display().to_string()).unwrap();
        assert!(dir_attr.entries.as_ref().unwrap().contains_key("a.c"));
    }

    #[test]
    fn symlink_carries_target() {
        let (store, _cache_dir, tree) = store();
        let link = tree.path().join("latest");
        symlink("build-42", &link).unwrap();

        let attrs = store.get_attr(&link.display().to_string());
        assert_eq!(attrs[0].link.as_deref(), Some("build-42"));
        assert!(attrs[0].info.unwrap().is_symlink());
    }

    #[test]
    fn delta_overrides_stat_view() {
        let (store, _cache_dir, tree) = store();
        let path = tree.path().join("gen.h").display().to_string();
        assert_eq!(store.get_attr(&path)[0].status, Status::Noent);

        let mut attr = FileAttr::new_ok(
            &path,
            FileInfo {
                mode: libc::S_IFREG | 0o644,
                size: 9,
                mtime: 1,
                uid: 0,
                gid: 0,
                dev: 0,
                ino: 0,
            },
        );
        attr.hash = Some(ContentCache::compute_hash(b"generated"));
        attr.content = Some(b"generated".to_vec());
        let fanout = store.apply_delta(&[attr.clone()]);
        assert_eq!(fanout.len(), 1);

        let now = store.get_attr(&path);
        assert!(now[0].status.is_ok());
        assert_eq!(now[0].hash, attr.hash);
        assert!(store.cache().has_hash(&attr.hash.unwrap()));
    }

    #[test]
    fn prefetch_covers_command_paths() {
        let (store, _cache_dir, tree) = store();
        let root = tree.path().display().to_string();
        fs::write(tree.path().join("main.c"), b"int main;").unwrap();

        let cmd = format!("gcc -c {root}/main.c -I{root}/include");
        let prefetch = store.prefetch_for_command(&root, &cmd);
        assert_eq!(prefetch.len(), 2);
        assert!(prefetch.iter().any(|a| a.path.ends_with("main.c") && a.status.is_ok()));
        assert!(prefetch.iter().any(|a| a.path.ends_with("include") && a.deletion()));
    }
}
