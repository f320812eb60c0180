//! Error kinds the engine recognizes (spec §7), plus the errno mapping used
//! at the FUSE boundary. Internal helpers return `EngineResult<T>`; only the
//! `fuser::Filesystem` trait methods in `fs.rs` convert these to errno and
//! call `reply.error(..)`.

use libc::c_int;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Handled by worker retry; should never reach a FUSE reply.
    #[error("transient remote error: {0}")]
    RemoteTransient(String),

    /// Logged; for uploads triggers a release reschedule, for deletes and
    /// metadata writes it is logged only (see §4.6 failure semantics).
    #[error("persistent remote error: {0}")]
    RemotePersistent(String),

    #[error("local I/O error")]
    LocalIo(#[from] std::io::Error),
}

impl EngineError {
    pub fn errno(&self) -> c_int {
        match self {
            EngineError::NotFound(_) => libc::ENOENT,
            EngineError::NotEmpty(_) => libc::ENOTEMPTY,
            EngineError::PermissionDenied(_) => libc::EACCES,
            EngineError::RemoteTransient(_) => libc::EIO,
            EngineError::RemotePersistent(_) => libc::EIO,
            EngineError::LocalIo(_) => libc::EIO,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
