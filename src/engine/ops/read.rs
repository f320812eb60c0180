//! `lookup`, `readdir`, `open`, `read` (spec §4.6) — grounded on the
//! original's `getattr`/`readdir`/`open`/`read` in `file_system.py` and the
//! teacher's `fs/read.rs`.

use crate::engine::{Engine, OpenFile};
use crate::error::{EngineError, EngineResult};
use crate::fsnode::FsNode;

/// Resolves `parent/name`, consulting the store directly when the index
/// has no entry and `metadata_collection = lazy` (spec §4.6 / config).
pub fn lookup(engine: &Engine, parent: &str, name: &str) -> EngineResult<FsNode> {
    let path = Engine::full_path(parent, name);
    if let Some(node) = engine.index.get_by_path(&path, false, engine.snapshot()) {
        return Ok(node);
    }

    if engine.config.metadata_collection == crate::config::MetadataCollection::Lazy {
        if let Some(headers) = engine.store.head(&path)? {
            if let Some(node) = FsNode::from_remote_headers(&path, &headers) {
                if !node.is_deleted(engine.snapshot()) {
                    engine.index.upsert(node.clone());
                    return Ok(node);
                }
            }
        }
    }

    Err(EngineError::NotFound(path))
}

pub fn readdir(engine: &Engine, path: &str) -> EngineResult<Vec<FsNode>> {
    if engine.config.metadata_collection == crate::config::MetadataCollection::Lazy {
        refresh_directory_from_store(engine, path)?;
    }
    Ok(engine.index.children(path, engine.snapshot()))
}

/// For lazy metadata collection, pulls the object listing for entries
/// under `path` once on first `readdir`, so subsequent `getattr`/`lookup`
/// calls against children are served from the index. Grounded on the
/// original's distinction between a Moodle-style eager prefetch at mount
/// and an otherwise lazy per-request `refresh_from_object_store`.
fn refresh_directory_from_store(engine: &Engine, path: &str) -> EngineResult<()> {
    let objects = engine.store.list()?;
    let prefix = if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    };
    for obj in objects {
        if !path.is_empty() && !obj.name.starts_with(&prefix) {
            continue;
        }
        let (folder, _) = crate::fsnode::split_path(&obj.name);
        if folder != path {
            continue;
        }
        if let Some(node) = FsNode::from_remote_headers(&obj.name, &obj.headers) {
            engine.index.upsert(node);
        }
    }
    Ok(())
}

/// Kicks off caching `path` if needed and returns as soon as a handle is
/// ready — it does not wait for the body to finish downloading (spec §4.6).
/// `read()` is the one that waits, and only for the bytes it actually needs.
pub fn open(engine: &Engine, path: &str, flags: i32) -> EngineResult<u64> {
    engine.ensure_cached(path)?;
    let write_access = (flags & libc::O_WRONLY != 0) || (flags & libc::O_RDWR != 0);
    let file = engine.cache.open_file(path, flags)?;
    Ok(engine.open_fh(path.to_string(), file, write_access))
}

pub fn read(engine: &Engine, fh: u64, offset: i64, size: u32) -> EngineResult<Vec<u8>> {
    let path = engine.with_open_fh(fh, |of| of.path.clone())?;
    engine.wait_for_range(&path, offset, size);
    engine.with_open_fh(fh, |of| engine.cache.read_at(&mut of.file, offset, size))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{blank_node, test_engine};
    use libc::S_IFREG;

    #[test]
    fn open_downloads_into_cache_on_first_access() {
        let (engine, _dir) = test_engine();
        let mut node = blank_node("f", S_IFREG as u32 | 0o644);
        node.size = 10;
        engine.index.upsert(node);
        engine.store.upload("f", b"cold bytes", &std::collections::HashMap::new()).unwrap();
        assert!(!engine.cache.exists("f"));

        let fh = open(&engine, "f", libc::O_RDONLY).unwrap();
        let body = read(&engine, fh, 0, 64).unwrap();
        assert_eq!(body, b"cold bytes");
        assert!(engine.cache.exists("f"));
    }

    #[test]
    fn lookup_on_missing_path_with_eager_collection_is_not_found() {
        let (engine, _dir) = test_engine();
        assert!(matches!(lookup(&engine, "", "ghost"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn readdir_lists_direct_children_only() {
        let (engine, _dir) = test_engine();
        engine.index.upsert(blank_node("dir", libc::S_IFDIR as u32 | 0o755));
        engine.index.upsert(blank_node("dir/a", S_IFREG as u32 | 0o644));
        engine.index.upsert(blank_node("dir/sub/b", S_IFREG as u32 | 0o644));

        let children = readdir(&engine, "dir").unwrap();
        let names: Vec<_> = children.iter().map(|n| n.name.clone()).collect();
        assert_eq!(names, vec!["a".to_string()]);
    }
}
