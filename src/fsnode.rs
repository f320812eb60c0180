//! `FsNode`, the in-memory/persisted record of a path's attributes (spec §3),
//! and its two codecs: from a cached-file stat, and from remote object
//! metadata headers. Grounded on the original's `fsnode.py`
//! (`update_from_cache` / `update_from_swift`) and `file.py`'s attribute
//! projection, generalized from sqlite-backed rows to a plain struct.

use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType};
use libc::{S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

/// A path's full POSIX + object-store metadata record (spec §3 table).
#[derive(Debug, Clone, PartialEq)]
pub struct FsNode {
    pub path: String,
    pub name: String,
    pub folder: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: f64,
    pub atime: f64,
    pub ctime: f64,
    pub nlink: u32,
    pub size: u64,
    pub link_source: Option<String>,
    pub dirty: bool,
    pub deleted_on: Option<f64>,
    pub downloading: Option<f64>,
    pub uploading: Option<f64>,
}

/// Splits a normalized path (no leading "/") into (folder, name), matching
/// the invariant `path = folder + "/" + name` with `folder == ""` at root
/// depth.
pub fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((folder, name)) => (folder.to_string(), name.to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Strips a single leading "/", the normalization every Operation Engine
/// entry point applies before touching the index or cache.
pub fn normalize(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

impl FsNode {
    pub fn root() -> Self {
        let now = now_secs();
        FsNode {
            path: String::new(),
            name: String::new(),
            folder: String::new(),
            mode: S_IFDIR as u32 | 0o755,
            uid: 0,
            gid: 0,
            mtime: now,
            atime: now,
            ctime: now,
            nlink: 2,
            size: 0,
            link_source: None,
            dirty: false,
            deleted_on: None,
            downloading: None,
            uploading: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        (self.mode & S_IFMT as u32) == S_IFDIR as u32
    }

    pub fn is_file(&self) -> bool {
        (self.mode & S_IFMT as u32) == S_IFREG as u32
    }

    pub fn is_symbolic_link(&self) -> bool {
        (self.mode & S_IFMT as u32) == S_IFLNK as u32
    }

    /// A node with `deleted_on <= snapshot` is invisible at that snapshot;
    /// a node with `deleted_on` unset is always visible (spec §3 invariant).
    pub fn is_deleted(&self, snapshot: Option<f64>) -> bool {
        match self.deleted_on {
            None => false,
            Some(deleted_on) => match snapshot {
                Some(s) => deleted_on <= s,
                // With no active snapshot filter, "now" is the read time:
                // anything soft-deleted is invisible.
                None => true,
            },
        }
    }

    /// Populates mode/uid/gid/times/nlink/size from the cached file's stat,
    /// and `link_source` if the cached path is itself a symlink (spec §4.5).
    pub fn from_cache(path: &str, cache_path: &Path) -> std::io::Result<Self> {
        let path = normalize(path).to_string();
        let (folder, name) = split_path(&path);
        let meta = std::fs::symlink_metadata(cache_path)?;

        let link_source = if meta.file_type().is_symlink() {
            std::fs::read_link(cache_path)
                .ok()
                .and_then(|p| p.to_str().map(|s| s.to_string()))
        } else {
            None
        };

        Ok(FsNode {
            path,
            name,
            folder,
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            mtime: meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1e9,
            atime: meta.atime() as f64 + meta.atime_nsec() as f64 / 1e9,
            ctime: meta.ctime() as f64 + meta.ctime_nsec() as f64 / 1e9,
            nlink: meta.nlink() as u32,
            size: meta.size(),
            link_source,
            dirty: false,
            deleted_on: None,
            downloading: None,
            uploading: None,
        })
    }

    /// Parses `x-object-meta-fs-*` headers into a node (spec §4.5 / §6).
    /// Returns `None` when a required field is missing or malformed — the
    /// caller (refresh-from-store) simply skips the object.
    pub fn from_remote_headers(object_name: &str, headers: &HashMap<String, String>) -> Option<Self> {
        let object_name = normalize(object_name).to_string();
        let (folder, name) = split_path(&object_name);

        let get_u32 = |key: &str| headers.get(key)?.parse::<u32>().ok();
        let get_u64 = |key: &str| headers.get(key)?.parse::<u64>().ok();
        let get_f64 = |key: &str| headers.get(key)?.parse::<f64>().ok();

        Some(FsNode {
            path: object_name,
            name,
            folder,
            mode: get_u32("fs-mode")?,
            uid: get_u32("fs-uid")?,
            gid: get_u32("fs-gid")?,
            mtime: get_f64("fs-mtime")?,
            atime: get_f64("fs-atime")?,
            ctime: get_f64("fs-ctime")?,
            nlink: get_u32("fs-nlink")?,
            size: get_u64("fs-size")?,
            link_source: headers.get("fs-link-source").cloned(),
            dirty: false,
            deleted_on: get_f64("fs-deleted-on"),
            downloading: None,
            uploading: None,
        })
    }

    /// Builds the `x-object-meta-fs-*` header map for an upload/metadata-set
    /// (the reverse of `from_remote_headers`, spec §4.5).
    pub fn to_remote_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("fs-mode".to_string(), self.mode.to_string());
        headers.insert("fs-uid".to_string(), self.uid.to_string());
        headers.insert("fs-gid".to_string(), self.gid.to_string());
        headers.insert("fs-mtime".to_string(), format!("{:.6}", self.mtime));
        headers.insert("fs-atime".to_string(), format!("{:.6}", self.atime));
        headers.insert("fs-ctime".to_string(), format!("{:.6}", self.ctime));
        headers.insert("fs-nlink".to_string(), self.nlink.to_string());
        headers.insert("fs-size".to_string(), self.size.to_string());
        if let Some(deleted_on) = self.deleted_on {
            headers.insert("fs-deleted-on".to_string(), format!("{:.6}", deleted_on));
        }
        if let Some(link_source) = &self.link_source {
            headers.insert("fs-link-source".to_string(), link_source.clone());
        }
        headers
    }

    /// Projects this node into the `fuser` attribute struct for a given
    /// inode number (inode assignment itself is the Mount Handler's job,
    /// not the index's — spec components 3 vs 7).
    pub fn to_file_attr(&self, ino: u64) -> FileAttr {
        let kind = if self.is_directory() {
            FileType::Directory
        } else if self.is_symbolic_link() {
            FileType::Symlink
        } else {
            FileType::RegularFile
        };

        FileAttr {
            ino,
            size: self.size,
            blocks: self.size.div_ceil(512),
            atime: secs_to_systemtime(self.atime),
            mtime: secs_to_systemtime(self.mtime),
            ctime: secs_to_systemtime(self.ctime),
            crtime: secs_to_systemtime(self.ctime),
            kind,
            perm: (self.mode & 0o7777) as u16,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
            blksize: 4096,
        }
    }
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn secs_to_systemtime(secs: f64) -> SystemTime {
    if secs <= 0.0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + std::time::Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_root_level_has_empty_folder() {
        let (folder, name) = split_path("a.txt");
        assert_eq!(folder, "");
        assert_eq!(name, "a.txt");
    }

    #[test]
    fn split_path_nested() {
        let (folder, name) = split_path("a/b/c.txt");
        assert_eq!(folder, "a/b");
        assert_eq!(name, "c.txt");
    }

    #[test]
    fn header_round_trip_preserves_typed_fields() {
        let node = FsNode {
            path: "a/b.txt".into(),
            name: "b.txt".into(),
            folder: "a".into(),
            mode: 0o100644,
            uid: 501,
            gid: 20,
            mtime: 12345.5,
            atime: 12345.5,
            ctime: 12345.5,
            nlink: 1,
            size: 32,
            link_source: Some("target".into()),
            dirty: false,
            deleted_on: Some(999.25),
            downloading: None,
            uploading: None,
        };

        let headers = node.to_remote_headers();
        let decoded = FsNode::from_remote_headers("a/b.txt", &headers).unwrap();

        assert_eq!(decoded.mode, node.mode);
        assert_eq!(decoded.uid, node.uid);
        assert_eq!(decoded.gid, node.gid);
        assert!((decoded.mtime - node.mtime).abs() < 1e-6);
        assert_eq!(decoded.nlink, node.nlink);
        assert_eq!(decoded.size, node.size);
        assert_eq!(decoded.link_source, node.link_source);
        assert_eq!(decoded.deleted_on, node.deleted_on);
    }

    #[test]
    fn deleted_visibility_respects_snapshot() {
        let mut node = FsNode::root();
        node.deleted_on = Some(100.0);
        assert!(node.is_deleted(None));
        assert!(node.is_deleted(Some(100.0)));
        assert!(!node.is_deleted(Some(99.0)));
    }
}
