//! The Operation Engine (spec §4.6): the filesystem-semantics layer sitting
//! between the kernel bridge ([`crate::fs`]) and the Metadata Index, Cache
//! Manager, Worker Pool and Job Executor. Each POSIX operation is a free
//! function in [`ops`] taking `&Engine`, mirroring the teacher's split of
//! `fs/attr.rs`, `fs/read.rs`, `fs/write.rs`, `fs/create.rs`,
//! `fs/delete.rs`, `fs/rename.rs`, `fs/xattr.rs` — one file per operation
//! family rather than one large `impl`.
//!
//! Grounded throughout on the original's `file_system.py`, which plays the
//! same role against `pyrax`/sqlite as this module does against
//! [`ObjectStore`]/[`Index`].

pub mod ops;

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::fsnode::{now_secs, FsNode};
use crate::index::Index;
use crate::job_executor::JobExecutor;
use crate::object_store::ObjectStore;
use crate::worker::{Pool, TaskKind};

pub struct OpenFile {
    pub path: String,
    pub file: File,
    pub writable: bool,
}

pub struct Engine {
    pub index: Arc<Index>,
    pub cache: Arc<CacheManager>,
    pub store: Arc<dyn ObjectStore>,
    pub pool: Arc<Pool>,
    pub job_executor: Arc<JobExecutor>,
    pub config: Config,
    open_files: Mutex<HashMap<u64, OpenFile>>,
    next_fh: AtomicU64,
}

impl Engine {
    pub fn new(
        index: Arc<Index>,
        cache: Arc<CacheManager>,
        store: Arc<dyn ObjectStore>,
        pool: Arc<Pool>,
        job_executor: Arc<JobExecutor>,
        config: Config,
    ) -> Self {
        Engine {
            index,
            cache,
            store,
            pool,
            job_executor,
            config,
            open_files: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Option<f64> {
        self.config.snapshot_timestamp()
    }

    pub(crate) fn open_fh(&self, path: String, file: File, writable: bool) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.open_files.lock().unwrap().insert(fh, OpenFile { path, file, writable });
        fh
    }

    pub(crate) fn with_open_fh<T>(&self, fh: u64, f: impl FnOnce(&mut OpenFile) -> T) -> EngineResult<T> {
        let mut files = self.open_files.lock().unwrap();
        let of = files
            .get_mut(&fh)
            .ok_or_else(|| EngineError::NotFound(format!("no open file handle {fh}")))?;
        Ok(f(of))
    }

    pub(crate) fn release_fh(&self, fh: u64) -> Option<OpenFile> {
        self.open_files.lock().unwrap().remove(&fh)
    }

    /// Kicks off caching `path`'s body if it isn't already present or in
    /// flight, and returns immediately — it does not wait for the transfer
    /// to finish. Symlinks and directories need no network round-trip and
    /// are materialized inline. Per spec §4.6, `open()` only starts the
    /// download; callers that need the bytes (`read()`) must wait on their
    /// own via [`Self::wait_for_range`] or [`Self::wait_for_download`].
    ///
    /// Grounded on the original's `refresh_cache_file`, which likewise fires
    /// the download as a background job and leaves waiting to the caller
    /// (`read()`'s own `while node.downloading: sleep(...)` loop).
    pub fn ensure_cached(&self, path: &str) -> EngineResult<()> {
        if self.cache.exists(path) {
            return Ok(());
        }

        let node = self
            .index
            .get_by_path(path, false, self.snapshot())
            .ok_or_else(|| EngineError::NotFound(path.to_string()))?;

        if node.is_directory() {
            self.cache.ensure_parent_dir(path)?;
            std::fs::create_dir_all(self.cache.cache_path(path))?;
            return Ok(());
        }

        if node.downloading.is_some() {
            // Already in flight (another caller's ensure_cached won the
            // race); let that transfer run its course.
            return Ok(());
        }

        if let Some(link_source) = node.link_source.clone() {
            self.cache.create_symlink(path, &link_source)?;
            return Ok(());
        }

        let mut node = node;
        node.downloading = Some(now_secs());
        self.index.upsert(node.clone());

        self.cache.create_placeholder(path)?;

        let index = self.index.clone();
        let path_owned = path.to_string();
        self.pool.submit(
            TaskKind::Download {
                name: path_owned.clone(),
                dest_path: self.cache.cache_path(path),
                chunk_size: self.config.download_chunk_size,
            },
            self.config.max_download_attempts,
            move |outcome| {
                if let Some(mut node) = index.get_by_path(&path_owned, true, None) {
                    node.downloading = None;
                    if let Err(e) = outcome {
                        tracing::error!(path = %path_owned, error = %e, "download failed");
                    }
                    index.upsert(node);
                }
            },
        );

        Ok(())
    }

    /// Waits (with a bounded poll loop) for any in-flight download on
    /// `path` observed via the index to finish. Used by callers that need
    /// the *entire* body before proceeding (`truncate`, the deferred-rename
    /// cache copy) and can tolerate giving up if the worker pool never
    /// reports back.
    pub fn wait_for_download(&self, path: &str) {
        for _ in 0..50 {
            match self.index.get_by_path(path, true, None) {
                Some(n) if n.downloading.is_some() => {
                    std::thread::sleep(Duration::from_millis(self.config.read_wait_poll_interval_ms));
                }
                _ => return,
            }
        }
    }

    /// Busy-waits until either `path`'s download finishes or the cached
    /// file already covers `[offset, offset + size)`, matching the
    /// original `read()`'s literal `while node.downloading: sleep(0.1)`
    /// loop. Unbounded, since the worker pool's own retry limit guarantees
    /// `downloading` eventually clears one way or another.
    pub fn wait_for_range(&self, path: &str, offset: i64, size: u32) {
        loop {
            let node = match self.index.get_by_path(path, true, None) {
                Some(n) => n,
                None => return,
            };
            if node.downloading.is_none() {
                return;
            }
            let wanted = (offset.max(0) as u64).saturating_add(size as u64).min(node.size);
            if let Ok(have) = self.cache.size(path) {
                if have >= wanted {
                    return;
                }
            }
            std::thread::sleep(Duration::from_millis(self.config.read_wait_poll_interval_ms));
        }
    }

    pub fn full_path(parent: &str, name: &str) -> String {
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        }
    }
}

/// A minimal in-memory `ObjectStore` and a fully wired `Engine` over a
/// temp-dir cache, shared by the `engine::ops::*` unit tests so each
/// module doesn't re-implement the same scaffolding.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::object_store::{Headers, ObjectStore, RemoteObject};
    use std::collections::HashMap as Map;
    use std::sync::Mutex as StdMutex;

    pub struct InMemoryStore {
        objects: StdMutex<HashMap<String, (Vec<u8>, Headers)>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            InMemoryStore { objects: StdMutex::new(HashMap::new()) }
        }
    }

    impl ObjectStore for InMemoryStore {
        fn list(&self) -> EngineResult<Vec<RemoteObject>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .map(|(name, (_, headers))| RemoteObject { name: name.clone(), headers: headers.clone() })
                .collect())
        }
        fn head(&self, name: &str) -> EngineResult<Option<Headers>> {
            Ok(self.objects.lock().unwrap().get(name).map(|(_, h)| h.clone()))
        }
        fn download(&self, name: &str) -> EngineResult<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(name)
                .map(|(b, _)| b.clone())
                .ok_or_else(|| EngineError::NotFound(name.to_string()))
        }
        fn upload(&self, name: &str, body: &[u8], headers: &Headers) -> EngineResult<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(name.to_string(), (body.to_vec(), headers.clone()));
            Ok(())
        }
        fn set_metadata(&self, name: &str, headers: &Headers) -> EngineResult<()> {
            let mut objects = self.objects.lock().unwrap();
            let entry = objects.entry(name.to_string()).or_insert_with(|| (Vec::new(), Map::new()));
            entry.1 = headers.clone();
            Ok(())
        }
        fn move_object(&self, from: &str, to: &str) -> EngineResult<()> {
            let mut objects = self.objects.lock().unwrap();
            if let Some(entry) = objects.remove(from) {
                objects.insert(to.to_string(), entry);
            }
            Ok(())
        }
        fn delete(&self, name: &str) -> EngineResult<()> {
            self.objects.lock().unwrap().remove(name);
            Ok(())
        }
    }

    pub fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(Index::new(None));
        let cache = Arc::new(CacheManager::new(dir.path().to_path_buf()));
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryStore::new());
        let pool = Arc::new(Pool::new(store.clone(), 2));
        let job_executor = Arc::new(JobExecutor::new(index.clone(), 10, Duration::from_millis(5)));
        let engine = Engine::new(index, cache, store, pool, job_executor, Config::default());
        (engine, dir)
    }

    pub fn blank_node(path: &str, mode: u32) -> FsNode {
        let (folder, name) = crate::fsnode::split_path(path);
        FsNode {
            path: path.to_string(),
            name,
            folder,
            mode,
            uid: 0,
            gid: 0,
            mtime: 0.0,
            atime: 0.0,
            ctime: 0.0,
            nlink: 1,
            size: 0,
            link_source: None,
            dirty: false,
            deleted_on: None,
            downloading: None,
            uploading: None,
        }
    }
}
