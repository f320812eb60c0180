//! `getxattr`, `setxattr`, `listxattr`, `removexattr` — the original
//! (`file_system.py`) never implements extended attributes beyond what
//! FUSE itself needs to function; this crate keeps that Non-goal (spec
//! §1) and returns the same "no xattrs here" answers the original's
//! stubs do.

use crate::error::EngineResult;

pub fn getxattr() -> EngineResult<Vec<u8>> {
    Ok(Vec::new())
}

pub fn setxattr() -> EngineResult<()> {
    Ok(())
}

pub fn listxattr() -> EngineResult<Vec<u8>> {
    Ok(Vec::new())
}

pub fn removexattr() -> EngineResult<()> {
    Ok(())
}
