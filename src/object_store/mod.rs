//! The Object-Store Adapter (spec §4.1): a narrow trait isolating the
//! engine from the concrete remote backend, plus one HTTP implementation.
//!
//! Grounded on the original's `swift_source.py`, which wraps `pyrax` (the
//! Swift SDK) behind `get_object`/`get_objects`/`update_object`/
//! `move_object`/`set_object_metadata` — the same seam this trait draws,
//! generalized away from Swift-the-product to "any object store reachable
//! over HTTP with per-object metadata headers".

pub mod http;

use std::collections::HashMap;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

pub type Headers = HashMap<String, String>;

/// One entry returned by [`ObjectStore::list`].
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub name: String,
    pub headers: Headers,
}

/// The seam between the engine and whatever bucket service backs it.
/// Every method is blocking: implementations that talk to an async HTTP
/// client drive it with a runtime internally rather than exposing
/// `async fn`, so worker threads can call this trait directly (the same
/// shape the teacher's `api_client.rs` uses from synchronous FUSE
/// callbacks).
pub trait ObjectStore: Send + Sync {
    /// Lists every object in the bucket along with its `fs-*` metadata
    /// headers, used to rebuild the Metadata Index (spec §4.3 refresh).
    fn list(&self) -> EngineResult<Vec<RemoteObject>>;

    /// Fetches only the metadata headers for one object, without its body.
    fn head(&self, name: &str) -> EngineResult<Option<Headers>>;

    /// Downloads an object's full body.
    fn download(&self, name: &str) -> EngineResult<Vec<u8>>;

    /// Streams an object's body straight to `dest_path` in chunks of
    /// roughly `chunk_size` bytes, so a concurrent reader can observe the
    /// destination file grow as the transfer progresses (spec §4.6's
    /// open/read split: `open` only kicks a download off, `read` busy-waits
    /// on cached bytes). The default just buffers through [`Self::download`]
    /// for implementations with no cheaper streaming path; [`super::http::HttpObjectStore`]
    /// overrides it to actually stream off the wire.
    fn download_to(&self, name: &str, dest_path: &Path, chunk_size: usize) -> EngineResult<()> {
        let _ = chunk_size;
        let body = self.download(name)?;
        std::fs::write(dest_path, body).map_err(EngineError::from)
    }

    /// Uploads a body with the given metadata headers, creating or
    /// overwriting the object.
    fn upload(&self, name: &str, body: &[u8], headers: &Headers) -> EngineResult<()>;

    /// Updates only metadata headers, without touching the body.
    fn set_metadata(&self, name: &str, headers: &Headers) -> EngineResult<()>;

    /// Server-side (or best-effort client-side) rename/move.
    fn move_object(&self, from: &str, to: &str) -> EngineResult<()>;

    fn delete(&self, name: &str) -> EngineResult<()>;
}
