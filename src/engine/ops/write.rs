//! `write`, `release`, `flush` (spec §4.6) — grounded on the original's
//! `write`/`release` in `file_system.py`. Writes go straight to the cache
//! file at the given offset (the REDESIGN FLAG correcting an earlier
//! "nonzero offset always appends" bug); `release` performs the coalesced
//! dirty/upload retry the original implements with nested
//! `callback`/`pre_execution` closures.

use std::sync::Arc;

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::fsnode::now_secs;
use crate::worker::TaskKind;

pub fn write(engine: &Engine, fh: u64, offset: i64, data: &[u8]) -> EngineResult<u32> {
    let path = engine.with_open_fh(fh, |of| of.path.clone())?;
    let written = engine.with_open_fh(fh, |of| engine.cache.write_at(&mut of.file, offset, data))??;

    let mut node = engine
        .index
        .get_by_path(&path, true, None)
        .unwrap_or_else(|| engine.index.get_or_create(&path));
    let end = offset as u64 + written as u64;
    if end > node.size {
        node.size = end;
    }
    node.mtime = now_secs();
    node.dirty = true;
    engine.index.save(node);

    Ok(written)
}

pub fn flush(_engine: &Engine, _fh: u64) -> EngineResult<()> {
    // The original's flush is a no-op: dirty bytes are already on disk in
    // the cache file from write(); the upload itself is deferred to
    // release (spec §4.6).
    Ok(())
}

/// Closes the file handle and, if the node is dirty, schedules an upload.
/// Mirrors the original's `release`: if the node is already `uploading`
/// when release fires, the upload is deferred rather than run twice, and
/// re-checked once the in-flight upload completes in case the file was
/// written again in the meantime.
pub fn release(engine: &Arc<Engine>, fh: u64) -> EngineResult<()> {
    let Some(open_file) = engine.release_fh(fh) else {
        return Ok(());
    };
    drop(open_file.file);

    schedule_upload_if_dirty(engine, &open_file.path);
    Ok(())
}

/// Takes `&Arc<Engine>` (not `&Engine`) because a completed upload's
/// callback runs on the Worker Pool's response thread, after this
/// function and its caller's stack frame are long gone — it needs an
/// owned, `'static` handle on the engine to re-check `dirty` and
/// potentially resubmit, exactly as the original's `release` nests a new
/// `callback` inside the one it just received.
fn schedule_upload_if_dirty(engine: &Arc<Engine>, path: &str) {
    let Some(node) = engine.index.get_by_path(path, true, None) else {
        return;
    };
    if !node.dirty {
        return;
    }
    if node.uploading.is_some() {
        // Another upload is already in flight; it will re-check `dirty`
        // after it completes (see the callback below), so nothing to do.
        return;
    }

    let mut node = node;
    node.uploading = Some(now_secs());
    engine.index.save(node.clone());

    let path = path.to_string();
    let body = match std::fs::read(engine.cache.cache_path(&path)) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "failed to read cache file for upload");
            clear_uploading(engine, &path);
            return;
        }
    };
    let headers = node.to_remote_headers();

    let engine_for_callback = engine.clone();
    engine.pool.submit(
        TaskKind::Upload { name: path.clone(), body, headers },
        engine.config.max_upload_attempts,
        move |result| {
            on_upload_complete(&engine_for_callback, &path, result);
        },
    );
}

/// Only clears `dirty` on success — on failure it stays `true` so the
/// recursive `schedule_upload_if_dirty` call below is a genuine retry
/// rather than a permanent no-op (a node left dirty with no in-flight
/// upload gets picked up the next time anything calls `release` on it,
/// and immediately here).
fn on_upload_complete(engine: &Arc<Engine>, path: &str, result: EngineResult<crate::worker::TaskOutcome>) {
    match result {
        Ok(_) => clear_uploading_and_dirty(engine, path),
        Err(e) => {
            tracing::error!(path = %path, error = %e, "upload failed");
            clear_uploading(engine, path);
        }
    }
    // The file may have been written again while this upload was in
    // flight, or the upload may have failed and left it dirty; either way
    // re-check, exactly like the original's nested `callback` re-invoking
    // `execute`.
    schedule_upload_if_dirty(engine, path);
}

fn clear_uploading(engine: &Engine, path: &str) {
    if let Some(mut node) = engine.index.get_by_path(path, true, None) {
        node.uploading = None;
        engine.index.save(node);
    }
}

fn clear_uploading_and_dirty(engine: &Engine, path: &str) {
    if let Some(mut node) = engine.index.get_by_path(path, true, None) {
        node.uploading = None;
        node.dirty = false;
        engine.index.save(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{blank_node, test_engine};
    use libc::S_IFREG;
    use std::time::Duration as StdDuration;

    #[test]
    fn positioned_write_updates_size_and_marks_dirty() {
        let (engine, _dir) = test_engine();
        let engine = Arc::new(engine);
        engine.index.upsert(blank_node("f", S_IFREG as u32 | 0o644));
        engine.cache.create_file("f").unwrap();
        let file = engine.cache.open_file("f", libc::O_RDWR).unwrap();
        let fh = engine.open_fh("f".to_string(), file, true);

        write(&engine, fh, 0, b"hello").unwrap();
        let node = engine.index.get_by_path("f", true, None).unwrap();
        assert_eq!(node.size, 5);
        assert!(node.dirty);
    }

    #[test]
    fn release_uploads_dirty_file_and_clears_flags() {
        let (engine, _dir) = test_engine();
        let engine = Arc::new(engine);
        engine.index.upsert(blank_node("f", S_IFREG as u32 | 0o644));
        engine.cache.create_file("f").unwrap();
        let file = engine.cache.open_file("f", libc::O_RDWR).unwrap();
        let fh = engine.open_fh("f".to_string(), file, true);

        write(&engine, fh, 0, b"hello").unwrap();
        release(&engine, fh).unwrap();

        for _ in 0..50 {
            let node = engine.index.get_by_path("f", true, None).unwrap();
            if !node.dirty && node.uploading.is_none() {
                let body = engine.store.download("f").unwrap();
                assert_eq!(body, b"hello");
                return;
            }
            std::thread::sleep(StdDuration::from_millis(10));
        }
        panic!("release did not complete upload within timeout");
    }
}
