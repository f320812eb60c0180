pub mod attr;
pub mod create;
pub mod delete;
pub mod read;
pub mod rename;
pub mod write;
pub mod xattr;

use crate::cache::StatFs;
use crate::engine::Engine;
use crate::error::EngineResult;

pub fn statfs(engine: &Engine, path: &str) -> EngineResult<StatFs> {
    engine.cache.statfs(path)
}
