//! The Mount Handler (spec component 7): implements `fuser::Filesystem`
//! directly, translating kernel callbacks into `engine::ops` calls and
//! inode numbers into paths. Grounded on the teacher's `fs/mod.rs`
//! (`FsWrapper` + `impl Filesystem for FsWrapper`), generalized from a
//! thin dispatcher over the teacher's per-operation modules into one over
//! this crate's `engine::ops`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};

use crate::attr_cache::AttributeCache;
use crate::engine::{ops, Engine};
use crate::fsnode::FsNode;

const ROOT_INODE: u64 = 1;

pub struct FsWrapper {
    engine: Arc<Engine>,
    attr_cache: AttributeCache,
    inode_to_path: Mutex<HashMap<u64, String>>,
    path_to_inode: Mutex<HashMap<String, u64>>,
    next_inode: AtomicU64,
    attr_ttl: Duration,
    entry_ttl: Duration,
}

impl FsWrapper {
    pub fn new(engine: Arc<Engine>) -> Self {
        let attr_cache = AttributeCache::new(
            engine.config.cache_strategy,
            engine.config.cache_ttl_seconds,
            engine.config.cache_lru_capacity,
        );

        let inode_to_path = Mutex::new(HashMap::from([(ROOT_INODE, String::new())]));
        let path_to_inode = Mutex::new(HashMap::from([(String::new(), ROOT_INODE)]));
        let attr_ttl = Duration::from_secs(engine.config.kernel_attr_timeout_seconds);
        let entry_ttl = Duration::from_secs(engine.config.kernel_entry_timeout_seconds);

        FsWrapper {
            engine,
            attr_cache,
            inode_to_path,
            path_to_inode,
            next_inode: AtomicU64::new(ROOT_INODE + 1),
            attr_ttl,
            entry_ttl,
        }
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.inode_to_path.lock().unwrap().get(&ino).cloned()
    }

    fn inode_for(&self, path: &str) -> u64 {
        let mut path_to_inode = self.path_to_inode.lock().unwrap();
        if let Some(ino) = path_to_inode.get(path) {
            return *ino;
        }
        let ino = self.next_inode.fetch_add(1, Ordering::SeqCst);
        path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.lock().unwrap().insert(ino, path.to_string());
        ino
    }

    fn forget_path(&self, path: &str) {
        if let Some(ino) = self.path_to_inode.lock().unwrap().remove(path) {
            self.inode_to_path.lock().unwrap().remove(&ino);
            self.attr_cache.remove(ino);
        }
    }

    fn attr_for(&self, ino: u64, node: &FsNode) -> FileAttr {
        let attr = node.to_file_attr(ino);
        self.attr_cache.put(ino, attr);
        attr
    }

    fn name_str(name: &OsStr) -> Option<&str> {
        name.to_str()
    }
}

impl Filesystem for FsWrapper {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_for(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = Self::name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };

        match ops::read::lookup(&self.engine, &parent_path, name) {
            Ok(node) => {
                let ino = self.inode_for(&node.path);
                let attr = self.attr_for(ino, &node);
                reply.entry(&self.entry_ttl, &attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        if let Some(attr) = self.attr_cache.get(ino) {
            reply.attr(&self.attr_ttl, &attr);
            return;
        }
        let Some(path) = self.path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match ops::attr::getattr(&self.engine, &path) {
            Ok(node) => reply.attr(&self.attr_ttl, &self.attr_for(ino, &node)),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let result = (|| -> Result<FsNode, crate::error::EngineError> {
            let mut node = ops::attr::getattr(&self.engine, &path)?;
            if let Some(mode) = mode {
                node = ops::attr::chmod(&self.engine, &path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                node = ops::attr::chown(&self.engine, &path, uid, gid)?;
            }
            if let Some(size) = size {
                node = ops::attr::truncate(&self.engine, &path, size)?;
            }
            Ok(node)
        })();

        match result {
            Ok(node) => reply.attr(&self.attr_ttl, &self.attr_for(ino, &node)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match ops::create::readlink(&self.engine, &path) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        // Matches the original's `mknod`: it only ever creates a regular
        // file (device/fifo nodes are never requested by the callers it
        // serves), so this reuses `create` and releases the handle `create`
        // would otherwise have kept open.
        let Some(parent_path) = self.path_for(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = Self::name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Engine::full_path(&parent_path, name);

        match ops::create::create(&self.engine, &path, mode, req.uid(), req.gid()) {
            Ok((node, fh)) => {
                self.engine.release_fh(fh);
                let ino = self.inode_for(&path);
                reply.entry(&self.entry_ttl, &self.attr_for(ino, &node), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(&mut self, req: &Request, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(parent_path) = self.path_for(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = Self::name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Engine::full_path(&parent_path, name);

        match ops::create::mkdir(&self.engine, &path, mode, req.uid(), req.gid()) {
            Ok(node) => {
                let ino = self.inode_for(&path);
                reply.entry(&self.entry_ttl, &self.attr_for(ino, &node), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_for(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = Self::name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Engine::full_path(&parent_path, name);

        match ops::delete::unlink(&self.engine, &path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_for(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = Self::name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Engine::full_path(&parent_path, name);

        match ops::delete::rmdir(&self.engine, &path) {
            Ok(()) => {
                self.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(&mut self, req: &Request, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
        let Some(parent_path) = self.path_for(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = Self::name_str(link_name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Engine::full_path(&parent_path, name);
        let target = target.to_string_lossy().to_string();

        match ops::create::symlink(&self.engine, &path, &target, req.uid(), req.gid()) {
            Ok(node) => {
                let ino = self.inode_for(&path);
                reply.entry(&self.entry_ttl, &self.attr_for(ino, &node), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(parent_path), Some(newparent_path)) = (self.path_for(parent), self.path_for(newparent)) else {
            reply.error(libc::ENOENT);
            return;
        };
        let (Some(name), Some(newname)) = (Self::name_str(name), Self::name_str(newname)) else {
            reply.error(libc::EINVAL);
            return;
        };
        let from = Engine::full_path(&parent_path, name);
        let to = Engine::full_path(&newparent_path, newname);

        match ops::rename::rename(&self.engine, &from, &to) {
            Ok(()) => {
                self.forget_path(&from);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(&mut self, _req: &Request, ino: u64, _newparent: u64, _newname: &OsStr, reply: ReplyEntry) {
        // Matches the original's `link`, which is a no-op `return 0`: hard
        // links are not representable against an object-store backend with
        // no inode sharing, so this just echoes back the target's existing
        // attributes under its original name rather than creating a second one.
        let Some(path) = self.path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match ops::attr::getattr(&self.engine, &path) {
            Ok(node) => reply.entry(&self.entry_ttl, &self.attr_for(ino, &node), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match ops::read::open(&self.engine, &path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
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
        match ops::read::read(&self.engine, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match ops::write::write(&self.engine, fh, offset, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match ops::write::flush(&self.engine, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
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
        match ops::write::release(&self.engine, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // Uploads are deferred to release by design (spec §4.6); fsync
        // has nothing additional to flush.
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.path_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let children = match ops::read::readdir(&self.engine, &path) {
            Ok(children) => children,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut entries = vec![
            (ino, fuser::FileType::Directory, ".".to_string()),
            (ino, fuser::FileType::Directory, "..".to_string()),
        ];
        for child in &children {
            let kind = if child.is_directory() {
                fuser::FileType::Directory
            } else if child.is_symbolic_link() {
                fuser::FileType::Symlink
            } else {
                fuser::FileType::RegularFile
            };
            let child_ino = self.inode_for(&child.path);
            self.attr_for(child_ino, child);
            entries.push((child_ino, kind, child.name.clone()));
        }

        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        let path = self.path_for(ino).unwrap_or_default();
        match ops::statfs(&self.engine, &path) {
            Ok(stat) => reply.statfs(
                stat.blocks,
                stat.bfree,
                stat.bavail,
                stat.files,
                stat.ffree,
                stat.bsize,
                stat.namelen,
                stat.frsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn access(&mut self, _req: &Request, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        // Permission enforcement is left to the backing object store's own
        // ACLs (spec §1 Non-goals); locally we always allow.
        reply.ok();
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.path_for(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = Self::name_str(name) else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = Engine::full_path(&parent_path, name);

        match ops::create::create(&self.engine, &path, mode, req.uid(), req.gid()) {
            Ok((node, fh)) => {
                let ino = self.inode_for(&path);
                reply.created(&self.entry_ttl, &self.attr_for(ino, &node), 0, fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request, _ino: u64, _name: &OsStr, _size: u32, reply: fuser::ReplyXattr) {
        match ops::xattr::getxattr() {
            Ok(_) => reply.error(libc::ENODATA),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        match ops::xattr::setxattr() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request, _ino: u64, _size: u32, reply: fuser::ReplyXattr) {
        match ops::xattr::listxattr() {
            Ok(_) => reply.size(0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        match ops::xattr::removexattr() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}
