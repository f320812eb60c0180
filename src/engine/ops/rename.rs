//! `rename` (spec §4.6) — grounded on the original's `rename` in
//! `file_system.py`: a client-side copy+delete (never atomic, since the
//! object store has no native rename), executed inline when the source
//! is already cached locally, or deferred through the job executor
//! (`refresh_cache_file` as `pre_execution`, the rename itself as
//! `execute`) when it isn't.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::fsnode::now_secs;
use crate::job_executor::FileOperation;
use crate::worker::TaskKind;

use super::delete;

pub fn rename(engine: &Arc<Engine>, from: &str, to: &str) -> EngineResult<()> {
    if engine.index.get_by_path(from, false, engine.snapshot()).is_none() {
        return Err(EngineError::NotFound(from.to_string()));
    }

    if engine.cache.exists(from) {
        execute_rename(engine, from, to);
        return Ok(());
    }

    let engine_pre = engine.clone();
    let from_pre = from.to_string();
    let engine_exec = engine.clone();
    let from_exec = from.to_string();
    let to_exec = to.to_string();

    engine.job_executor.enqueue(FileOperation {
        path: from.to_string(),
        pre_execution: Some(Box::new(move || {
            if let Err(e) = engine_pre.ensure_cached(&from_pre) {
                tracing::warn!(path = %from_pre, error = %e, "deferred rename: failed to refresh cache");
            }
            engine_pre.wait_for_download(&from_pre);
        })),
        execute: Box::new(move || {
            execute_rename(&engine_exec, &from_exec, &to_exec);
        }),
        attempt: 0,
    });

    Ok(())
}

/// Not atomic: creates the destination row, copies the cached body,
/// marks it dirty so the next release uploads it, then soft-deletes the
/// source. A crash between these steps leaves both paths present, the
/// same failure mode the original accepts (`file_system.py`'s `rename`
/// docstring).
fn execute_rename(engine: &Engine, from: &str, to: &str) {
    let Some(mut src) = engine.index.get_by_path(from, false, None) else {
        tracing::warn!(path = %from, "rename: source vanished before execute");
        return;
    };

    let (folder, name) = crate::fsnode::split_path(to);
    let now = now_secs();
    src.path = to.to_string();
    src.folder = folder;
    src.name = name;
    src.mtime = now;
    src.ctime = now;
    src.dirty = true;
    engine.index.upsert(src.clone());

    if engine.cache.exists(from) {
        if let Err(e) = copy_cache_entry(engine, from, to) {
            tracing::error!(path = %from, dest = %to, error = %e, "rename: failed to copy cache entry");
        }
    }

    if src.is_file() {
        schedule_upload(engine, to, &src);
    }

    if let Err(e) = delete::unlink(engine, from) {
        tracing::error!(path = %from, error = %e, "rename: failed to soft-delete source");
    }
}

fn copy_cache_entry(engine: &Engine, from: &str, to: &str) -> EngineResult<()> {
    engine.cache.ensure_parent_dir(to)?;
    let bytes = std::fs::read(engine.cache.cache_path(from))?;
    std::fs::write(engine.cache.cache_path(to), bytes)?;
    Ok(())
}

fn schedule_upload(engine: &Engine, path: &str, node: &crate::fsnode::FsNode) {
    let Ok(body) = std::fs::read(engine.cache.cache_path(path)) else {
        return;
    };
    let headers = node.to_remote_headers();
    let path_owned = path.to_string();
    engine.pool.submit(
        TaskKind::Upload { name: path.to_string(), body, headers },
        engine.config.max_upload_attempts,
        move |result| {
            if let Err(e) = result {
                tracing::warn!(path = %path_owned, error = %e, "post-rename upload failed");
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{blank_node, test_engine};
    use libc::S_IFREG;
    use std::time::Duration as StdDuration;

    #[test]
    fn rename_with_cached_body_moves_inline() {
        let (engine, _dir) = test_engine();
        let engine = Arc::new(engine);
        engine.index.upsert(blank_node("a", S_IFREG as u32 | 0o644));
        engine.cache.create_file("a").unwrap();
        std::fs::write(engine.cache.cache_path("a"), b"payload").unwrap();

        rename(&engine, "a", "b").unwrap();

        assert!(engine.index.get_by_path("a", false, None).is_none());
        let moved = engine.index.get_by_path("b", false, None).unwrap();
        assert_eq!(moved.path, "b");
        assert!(engine.cache.exists("b"));
    }

    #[test]
    fn rename_without_cached_body_defers_through_job_executor() {
        let (engine, _dir) = test_engine();
        let engine = Arc::new(engine);
        engine.index.upsert(blank_node("a", S_IFREG as u32 | 0o644));
        engine.store.upload("a", b"remote bytes", &std::collections::HashMap::new()).unwrap();
        engine.job_executor.start();

        rename(&engine, "a", "b").unwrap();

        for _ in 0..50 {
            if engine.index.get_by_path("b", false, None).is_some() {
                engine.job_executor.shutdown();
                return;
            }
            std::thread::sleep(StdDuration::from_millis(10));
        }
        engine.job_executor.shutdown();
        panic!("deferred rename did not complete within timeout");
    }
}
