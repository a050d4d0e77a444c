//! The filesystem data model: `FileAttr` is the unit of knowledge a
//! master and its workers exchange about one path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A BLAKE3 content digest. Opaque to everything except the cache.
pub type Hash = [u8; 32];

/// Listing of one directory: child name (no slashes) to raw mode bits.
pub type NameModeMap = BTreeMap<String, u32>;

/// Outcome of a filesystem operation, carried in-band rather than as an
/// error. `Noent` doubles as the negative-entry marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Noent,
    Perm,
    Inval,
    Io,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// The errno this status surfaces as through a kernel filesystem layer.
    pub fn errno(&self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Noent => libc::ENOENT,
            Status::Perm => libc::EPERM,
            Status::Inval => libc::EINVAL,
            Status::Io => libc::EIO,
        }
    }
}

/// The stat-like record. Device and inode are advisory only: they never
/// participate in cross-machine equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
    pub dev: u64,
    pub ino: u64,
}

impl FileInfo {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        FileInfo {
            mode: meta.mode(),
            size: meta.size(),
            mtime: meta.mtime(),
            uid: meta.uid(),
            gid: meta.gid(),
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    /// The cross-machine identity of a file: mode, size and mtime. Two
    /// FileInfos are "the same file" iff their encodings match.
    pub fn encoded(&self) -> (u32, u64, i64) {
        (self.mode, self.size, self.mtime)
    }

    pub fn is_regular(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }
}

/// One path's worth of filesystem knowledge.
///
/// - `info` is present iff `status` is `Ok`.
/// - `hash` is present iff the entry is a regular file with known content.
/// - `link` is present iff the entry is a symlink.
/// - `entries` is present iff the entry is a directory.
/// - `content` optionally inlines small file bytes to save a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Absolute path, leading slash.
    pub path: String,
    pub status: Status,
    pub info: Option<FileInfo>,
    pub hash: Option<Hash>,
    pub link: Option<String>,
    pub entries: Option<NameModeMap>,
    pub content: Option<Vec<u8>>,
}

impl FileAttr {
    /// A negative entry: the path is known to not exist.
    pub fn negative(path: impl Into<String>) -> Self {
        FileAttr {
            path: path.into(),
            status: Status::Noent,
            info: None,
            hash: None,
            link: None,
            entries: None,
            content: None,
        }
    }

    pub fn new_ok(path: impl Into<String>, info: FileInfo) -> Self {
        FileAttr {
            path: path.into(),
            status: Status::Ok,
            info: Some(info),
            hash: None,
            link: None,
            entries: None,
            content: None,
        }
    }

    /// True iff this entry now represents non-existence.
    pub fn deletion(&self) -> bool {
        self.status == Status::Noent
    }

    /// Path without the leading slash, the worker-side cache key.
    pub fn trimmed_path(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}
