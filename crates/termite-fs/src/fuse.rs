//! Kernel filesystem adapter: exposes an [`RpcFs`](crate::RpcFs) through
//! `fuser` on Linux. Behind the `fuse` feature; elsewhere a stub that
//! reports the view as unmountable.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod imp {
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::os::unix::fs::FileExt;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    use fuser::{
        FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
        ReplyEntry, ReplyOpen, Request,
    };
    use tracing::debug;

    use termite_proto::{FileAttr as WireAttr, FileInfo};

    use crate::RpcFs;

    const TTL: Duration = Duration::from_secs(1);
    const BLOCK_SIZE: u32 = 4096;

    pub struct RpcFsMount {
        fs: Arc<RpcFs>,
        rt: tokio::runtime::Handle,
        paths: HashMap<u64, String>,
        inos: HashMap<String, u64>,
        next_ino: u64,
        handles: HashMap<u64, std::fs::File>,
        next_fh: u64,
    }

    impl RpcFsMount {
        pub fn new(fs: Arc<RpcFs>, rt: tokio::runtime::Handle) -> Self {
            let mut mount = RpcFsMount {
                fs,
                rt,
                paths: HashMap::new(),
                inos: HashMap::new(),
                next_ino: 2,
                handles: HashMap::new(),
                next_fh: 1,
            };
            mount.paths.insert(1, String::new());
            mount.inos.insert(String::new(), 1);
            mount
        }

        fn intern(&mut self, path: &str) -> u64 {
            if let Some(ino) = self.inos.get(path) {
                return *ino;
            }
            let ino = self.next_ino;
            self.next_ino += 1;
            self.paths.insert(ino, path.to_string());
            self.inos.insert(path.to_string(), ino);
            ino
        }

        fn to_fuse_attr(ino: u64, info: &FileInfo) -> fuser::FileAttr {
            let kind = if info.is_dir() {
                FileType::Directory
            } else if info.is_symlink() {
                FileType::Symlink
            } else {
                FileType::RegularFile
            };
            let mtime = UNIX_EPOCH + Duration::from_secs(info.mtime.max(0) as u64);
            fuser::FileAttr {
                ino,
                size: info.size,
                blocks: info.size.div_ceil(BLOCK_SIZE as u64),
                atime: mtime,
                mtime,
                ctime: mtime,
                crtime: mtime,
                kind,
                perm: (info.mode & 0o7777) as u16,
                nlink: if info.is_dir() { 2 } else { 1 },
                uid: info.uid,
                gid: info.gid,
                rdev: 0,
                flags: 0,
                blksize: BLOCK_SIZE,
            }
        }

        fn lookup_attr(&self, path: &str) -> Option<Arc<WireAttr>> {
            let fs = self.fs.clone();
            let name = path.to_string();
            self.rt.block_on(async move { fs.get_attr(&name).await })
        }
    }

    impl Filesystem for RpcFsMount {
        fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
            let (Some(parent_path), Some(name)) = (self.paths.get(&parent), name.to_str()) else {
                reply.error(libc::ENOENT);
                return;
            };
            let path = if parent_path.is_empty() {
                name.to_string()
            } else {
                format!("{parent_path}/{name}")
            };
            match self.lookup_attr(&path) {
                Some(attr) if attr.status.is_ok() => {
                    let info = attr.info.expect("ok attr carries info");
                    let ino = self.intern(&path);
                    reply.entry(&TTL, &Self::to_fuse_attr(ino, &info), 0);
                }
                Some(attr) => reply.error(attr.status.errno()),
                None => reply.error(libc::ENOENT),
            }
        }

        fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
            let Some(path) = self.paths.get(&ino).cloned() else {
                reply.error(libc::ENOENT);
                return;
            };
            if path.is_empty() {
                reply.attr(&TTL, &Self::to_fuse_attr(1, &self.fs.root_info()));
                return;
            }
            match self.lookup_attr(&path) {
                Some(attr) if attr.status.is_ok() => {
                    let info = attr.info.expect("ok attr carries info");
                    reply.attr(&TTL, &Self::to_fuse_attr(ino, &info));
                }
                Some(attr) => reply.error(attr.status.errno()),
                None => reply.error(libc::ENOENT),
            }
        }

        fn readdir(
            &mut self,
            _req: &Request,
            ino: u64,
            _fh: u64,
            offset: i64,
            mut reply: ReplyDirectory,
        ) {
            let Some(path) = self.paths.get(&ino).cloned() else {
                reply.error(libc::ENOENT);
                return;
            };
            let fs = self.fs.clone();
            let entries = {
                let name = path.clone();
                self.rt.block_on(async move { fs.open_dir(&name).await })
            };
            let entries = match entries {
                Ok(entries) => entries,
                Err(status) => {
                    reply.error(status.errno());
                    return;
                }
            };

            let mut all: Vec<(u64, FileType, String)> = vec![
                (ino, FileType::Directory, ".".to_string()),
                (1, FileType::Directory, "..".to_string()),
            ];
            for (name, mode) in &entries {
                let child = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}/{name}")
                };
                let kind = match mode & libc::S_IFMT {
                    libc::S_IFDIR => FileType::Directory,
                    libc::S_IFLNK => FileType::Symlink,
                    _ => FileType::RegularFile,
                };
                let child_ino = self.intern(&child);
                all.push((child_ino, kind, name.clone()));
            }
            for (i, (entry_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
                if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                    break;
                }
            }
            reply.ok();
        }

        fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
            let Some(path) = self.paths.get(&ino).cloned() else {
                reply.error(libc::ENOENT);
                return;
            };
            let fs = self.fs.clone();
            let target = self.rt.block_on(async move { fs.readlink(&path).await });
            match target {
                Ok(target) => reply.data(target.as_bytes()),
                Err(status) => reply.error(status.errno()),
            }
        }

        fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
            let Some(path) = self.paths.get(&ino).cloned() else {
                reply.error(libc::ENOENT);
                return;
            };
            let write = flags & libc::O_ACCMODE != libc::O_RDONLY;
            let fs = self.fs.clone();
            let file = self.rt.block_on(async move { fs.open(&path, write).await });
            match file {
                Ok(file) => {
                    let fh = self.next_fh;
                    self.next_fh += 1;
                    self.handles.insert(fh, file);
                    reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE);
                }
                Err(status) => reply.error(status.errno()),
            }
        }

        fn read(
            &mut self,
            _req: &Request,
            _ino: u64,
            fh: u64,
            offset: i64,
            size: u32,
            _flags: i32,
            _lock_owner: Option<u64>,
            reply: ReplyData,
        ) {
            let Some(file) = self.handles.get(&fh) else {
                reply.error(libc::EBADF);
                return;
            };
            let mut buf = vec![0u8; size as usize];
            match file.read_at(&mut buf, offset as u64) {
                Ok(n) => reply.data(&buf[..n]),
                Err(_) => reply.error(libc::EIO),
            }
        }

        fn release(
            &mut self,
            _req: &Request,
            _ino: u64,
            fh: u64,
            _flags: i32,
            _lock_owner: Option<u64>,
            _flush: bool,
            reply: ReplyEmpty,
        ) {
            self.handles.remove(&fh);
            reply.ok();
        }
    }

    /// A live kernel mount; dropping it unmounts.
    pub struct MountGuard {
        _session: fuser::BackgroundSession,
    }

    /// Mount the view read-only at `mountpoint`.
    pub fn mount(
        fs: Arc<RpcFs>,
        mountpoint: &Path,
        rt: tokio::runtime::Handle,
    ) -> std::io::Result<MountGuard> {
        debug!(mountpoint = %mountpoint.display(), "mounting remote view");
        let session = fuser::spawn_mount2(
            RpcFsMount::new(fs, rt),
            mountpoint,
            &[MountOption::RO, MountOption::FSName("termite".to_string())],
        )?;
        Ok(MountGuard { _session: session })
    }
}

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
mod imp {
    use std::path::Path;
    use std::sync::Arc;

    use crate::RpcFs;

    /// Stub for platforms or builds without FUSE support.
    pub struct MountGuard {}

    /// Mount stub. Jobs still resolve the view through the typed RpcFs
    /// API.
    pub fn mount(
        _fs: Arc<RpcFs>,
        mountpoint: &Path,
        _rt: tokio::runtime::Handle,
    ) -> std::io::Result<MountGuard> {
        tracing::warn!(
            mountpoint = %mountpoint.display(),
            "kernel mounts need the `fuse` feature on Linux; serving via the in-process API only"
        );
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "fuse support not compiled in",
        ))
    }
}

pub use imp::*;
