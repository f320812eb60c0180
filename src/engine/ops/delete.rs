//! `unlink`, `rmdir` (spec §4.6) — grounded on the original's
//! `unlink`/`rmdir` in `file_system.py`, which soft-deletes by setting
//! `fs-deleted-on` metadata rather than issuing a remote DELETE, so that
//! a `snapshot_time` mount can still see the object.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::fsnode::now_secs;
use crate::worker::TaskKind;

pub fn unlink(engine: &Engine, path: &str) -> EngineResult<()> {
    let mut node = engine
        .index
        .get_by_path(path, false, engine.snapshot())
        .ok_or_else(|| EngineError::NotFound(path.to_string()))?;

    let now = now_secs();
    node.deleted_on = Some(now);
    node.dirty = false;
    engine.index.save(node.clone());

    engine.cache.remove_file(path).ok();

    let path_owned = path.to_string();
    let headers = node.to_remote_headers();
    engine.pool.submit(
        TaskKind::SetMetadata { name: path_owned.clone(), headers },
        engine.config.max_upload_attempts,
        move |result| {
            if let Err(e) = result {
                tracing::warn!(path = %path_owned, error = %e, "soft-delete metadata push failed");
            }
        },
    );

    Ok(())
}

pub fn rmdir(engine: &Engine, path: &str) -> EngineResult<()> {
    let node = engine
        .index
        .get_by_path(path, false, engine.snapshot())
        .ok_or_else(|| EngineError::NotFound(path.to_string()))?;
    if !node.is_directory() {
        return Err(EngineError::NotFound(format!("{path} is not a directory")));
    }

    if !engine.index.children(path, engine.snapshot()).is_empty() {
        return Err(EngineError::NotEmpty(path.to_string()));
    }

    unlink(engine, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{blank_node, test_engine};
    use libc::{S_IFDIR, S_IFREG};

    #[test]
    fn rmdir_rejects_non_empty_directory() {
        let (engine, _dir) = test_engine();
        engine.index.upsert(blank_node("d", S_IFDIR as u32 | 0o755));
        engine.index.upsert(blank_node("d/f", S_IFREG as u32 | 0o644));

        assert!(matches!(rmdir(&engine, "d"), Err(EngineError::NotEmpty(_))));
    }

    #[test]
    fn rmdir_succeeds_once_empty() {
        let (engine, _dir) = test_engine();
        engine.index.upsert(blank_node("d", S_IFDIR as u32 | 0o755));

        rmdir(&engine, "d").unwrap();
        assert!(engine.index.get_by_path("d", false, None).is_none());
    }

    #[test]
    fn unlink_hides_path_but_keeps_it_visible_before_its_own_deletion_time() {
        let (engine, _dir) = test_engine();
        engine.index.upsert(blank_node("f", S_IFREG as u32 | 0o644));

        unlink(&engine, "f").unwrap();
        assert!(engine.index.get_by_path("f", false, None).is_none());
        assert!(engine.index.get_by_path("f", true, None).is_some());
    }
}
