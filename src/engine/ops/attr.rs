//! `getattr`, `chmod`, `chown`, `truncate` (spec §4.6) — grounded on the
//! original's `getattr`/`chmod`/`chown`/`truncate` in `file_system.py` and
//! the teacher's `fs/attr.rs`.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::fsnode::{now_secs, FsNode};

pub fn getattr(engine: &Engine, path: &str) -> EngineResult<FsNode> {
    if path.is_empty() {
        return Ok(FsNode::root());
    }
    engine
        .index
        .get_by_path(path, false, engine.snapshot())
        .ok_or_else(|| EngineError::NotFound(path.to_string()))
}

pub fn chmod(engine: &Engine, path: &str, mode: u32) -> EngineResult<FsNode> {
    let mut node = getattr(engine, path)?;
    node.mode = (node.mode & !0o7777) | (mode & 0o7777);
    node.ctime = now_secs();
    engine.index.save(node.clone());
    push_metadata_update(engine, node.clone());
    Ok(node)
}

pub fn chown(engine: &Engine, path: &str, uid: Option<u32>, gid: Option<u32>) -> EngineResult<FsNode> {
    let mut node = getattr(engine, path)?;
    if let Some(uid) = uid {
        node.uid = uid;
    }
    if let Some(gid) = gid {
        node.gid = gid;
    }
    node.ctime = now_secs();
    engine.index.save(node.clone());
    push_metadata_update(engine, node.clone());
    Ok(node)
}

/// Grows or shrinks a file's cached body and updates `size` (spec §4.6
/// `truncate`); the object store is not touched until the next release,
/// matching the original's `truncate`, which only marks the row dirty.
pub fn truncate(engine: &Engine, path: &str, size: u64) -> EngineResult<FsNode> {
    let mut node = getattr(engine, path)?;
    engine.ensure_cached(path)?;
    engine.wait_for_download(path);
    engine.cache.truncate_path(path, size)?;
    node.size = size;
    node.mtime = now_secs();
    node.ctime = node.mtime;
    node.dirty = true;
    engine.index.save(node.clone());
    Ok(node)
}

/// Best-effort async metadata push for operations that only change
/// POSIX attributes (chmod/chown) without touching file contents. The
/// original does this inline and synchronously in `chmod`/`chown`; here
/// it goes through the worker pool so a metadata push never blocks the
/// calling FUSE thread, with failures merely logged (spec §4.6's
/// "logged only" failure semantics for metadata writes).
pub(crate) fn push_metadata_update(engine: &Engine, node: FsNode) {
    let path = node.path.clone();
    let headers = node.to_remote_headers();
    engine.pool.submit(
        crate::worker::TaskKind::SetMetadata { name: path.clone(), headers },
        engine.config.max_upload_attempts,
        move |result| {
            if let Err(e) = result {
                tracing::warn!(path = %path, error = %e, "metadata update failed");
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{blank_node, test_engine};

    #[test]
    fn chmod_masks_only_permission_bits() {
        let (engine, _dir) = test_engine();
        engine.index.upsert(blank_node("f", 0o100644));
        let updated = chmod(&engine, "f", 0o600).unwrap();
        assert_eq!(updated.mode & 0o7777, 0o600);
        assert_eq!(updated.mode & libc::S_IFMT as u32, libc::S_IFREG as u32);
    }

    #[test]
    fn getattr_on_missing_path_is_not_found() {
        let (engine, _dir) = test_engine();
        assert!(matches!(getattr(&engine, "nope"), Err(EngineError::NotFound(_))));
    }
}
