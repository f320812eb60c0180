//! The Cache Manager (spec §4.4): maps logical paths to on-disk cache paths,
//! creates parent directories on demand, and performs positioned I/O.
//!
//! Grounded on the original's repeated `cache_path()` helper
//! (`file_system.py`, `file.py`) and on the teacher's `fs/cache.rs`
//! attribute-cache module for the "single lock serializes positioned I/O"
//! shape (spec: "Holds a single rwlock used only for read/write to
//! serialize positioned I/O on a file descriptor").

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};

pub struct CacheManager {
    cache_root: PathBuf,
    /// Coarse per-mount lock serializing positioned reads/writes, per
    /// spec §4.4/§5. A single `Mutex` rather than an rwlock: read() and
    /// write() both reposition the shared file offset, so concurrent
    /// readers cannot safely share the lock either.
    io_lock: Mutex<()>,
}

impl CacheManager {
    pub fn new(cache_root: PathBuf) -> Self {
        CacheManager {
            cache_root,
            io_lock: Mutex::new(()),
        }
    }

    pub fn cache_path(&self, path: &str) -> PathBuf {
        self.cache_root.join(crate::fsnode::normalize(path))
    }

    pub fn ensure_parent_dir(&self, path: &str) -> EngineResult<()> {
        let cache_path = self.cache_path(path);
        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.cache_path(path).exists()
    }

    pub fn size(&self, path: &str) -> EngineResult<u64> {
        Ok(std::fs::metadata(self.cache_path(path))?.len())
    }

    pub fn create_dir(&self, path: &str, mode: u32) -> EngineResult<()> {
        self.ensure_parent_dir(path)?;
        let cache_path = self.cache_path(path);
        std::fs::create_dir(&cache_path)?;
        set_unix_mode(&cache_path, mode)?;
        Ok(())
    }

    pub fn remove_dir(&self, path: &str) -> EngineResult<()> {
        let cache_path = self.cache_path(path);
        if cache_path.exists() {
            std::fs::remove_dir(&cache_path)?;
        }
        Ok(())
    }

    pub fn remove_file(&self, path: &str) -> EngineResult<()> {
        let cache_path = self.cache_path(path);
        if cache_path.exists() {
            std::fs::remove_file(&cache_path)?;
        }
        Ok(())
    }

    pub fn create_symlink(&self, path: &str, target: &str) -> EngineResult<()> {
        self.ensure_parent_dir(path)?;
        let cache_path = self.cache_path(path);
        symlink(target, &cache_path)?;
        Ok(())
    }

    pub fn create_placeholder(&self, path: &str) -> EngineResult<()> {
        self.ensure_parent_dir(path)?;
        File::create(self.cache_path(path))?;
        Ok(())
    }

    /// Opens the cache file for write-only creation (`create`, spec §4.6).
    pub fn create_file(&self, path: &str) -> EngineResult<File> {
        self.ensure_parent_dir(path)?;
        Ok(OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.cache_path(path))?)
    }

    /// Opens the cache file with flags translated to `OpenOptions` (`open`,
    /// spec §4.6). FUSE `open` flags are POSIX `O_*`; we only need to
    /// distinguish read vs. write access since the cache file always
    /// already exists by the time this is called.
    pub fn open_file(&self, path: &str, flags: i32) -> EngineResult<File> {
        let write_access = (flags & libc::O_WRONLY != 0) || (flags & libc::O_RDWR != 0);
        let mut options = OpenOptions::new();
        options.read(true);
        if write_access {
            options.write(true);
        }
        Ok(options.open(self.cache_path(path))?)
    }

    pub fn read_at(&self, file: &mut File, offset: i64, size: u32) -> EngineResult<Vec<u8>> {
        let _guard = self.io_lock.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn write_at(&self, file: &mut File, offset: i64, data: &[u8]) -> EngineResult<u32> {
        let _guard = self.io_lock.lock().unwrap();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        Ok(data.len() as u32)
    }

    pub fn truncate_file(&self, file: &File, length: u64) -> EngineResult<()> {
        let _guard = self.io_lock.lock().unwrap();
        file.set_len(length)?;
        Ok(())
    }

    pub fn truncate_path(&self, path: &str, length: u64) -> EngineResult<()> {
        let cache_path = self.cache_path(path);
        let file = OpenOptions::new().write(true).open(cache_path)?;
        self.truncate_file(&file, length)
    }

    pub fn statfs(&self, path: &str) -> EngineResult<StatFs> {
        let cache_path = self.cache_path(path);
        let cstr = std::ffi::CString::new(cache_path.as_os_str().as_encoded_bytes())
            .map_err(|_| EngineError::LocalIo(std::io::Error::other("invalid path for statvfs")))?;
        unsafe {
            let mut buf: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(cstr.as_ptr(), &mut buf) != 0 {
                return Err(EngineError::LocalIo(std::io::Error::last_os_error()));
            }
            Ok(StatFs {
                blocks: buf.f_blocks,
                bfree: buf.f_bfree,
                bavail: buf.f_bavail,
                files: buf.f_files,
                ffree: buf.f_ffree,
                bsize: buf.f_bsize as u32,
                namelen: buf.f_namemax as u32,
                frsize: buf.f_frsize as u32,
            })
        }
    }

    pub fn root(&self) -> &Path {
        &self.cache_root
    }
}

pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

fn set_unix_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf());
        let mut file = cache.create_file("hello.txt").unwrap();
        cache.write_at(&mut file, 0, b"hello").unwrap();

        let mut file = cache.open_file("hello.txt", libc::O_RDONLY).unwrap();
        let data = cache.read_at(&mut file, 0, 5).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn positioned_write_does_not_append() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf());
        let mut file = cache.create_file("f").unwrap();
        cache.write_at(&mut file, 0, b"aaaaa").unwrap();
        cache.write_at(&mut file, 1, b"bb").unwrap();

        let mut file = cache.open_file("f", libc::O_RDONLY).unwrap();
        let data = cache.read_at(&mut file, 0, 5).unwrap();
        assert_eq!(data, b"abbaa");
    }

    #[test]
    fn ensure_parent_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf());
        cache.ensure_parent_dir("a/b/c.txt").unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
