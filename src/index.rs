//! The Metadata Index: an authoritative, in-memory view of the namespace,
//! keyed by path, with soft-delete and snapshot semantics (spec §4.3).
//!
//! Backed by a `HashMap` guarded by an `RwLock`, per spec's "may back the
//! index with an in-memory map or an embedded single-file database; either
//! way, reads must be safe under concurrent writers." Optionally persisted
//! to a single JSON file co-located with the cache root (spec §6,
//! "Persisted state layout"), loosely modeled on the original's sqlite
//! table but without taking on a database dependency the rest of the crate
//! has no other use for.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::fsnode::FsNode;

#[derive(Serialize, Deserialize)]
struct PersistedNode {
    path: String,
    name: String,
    folder: String,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: f64,
    atime: f64,
    ctime: f64,
    nlink: u32,
    size: u64,
    link_source: Option<String>,
    dirty: bool,
    deleted_on: Option<f64>,
}

impl From<&FsNode> for PersistedNode {
    fn from(n: &FsNode) -> Self {
        PersistedNode {
            path: n.path.clone(),
            name: n.name.clone(),
            folder: n.folder.clone(),
            mode: n.mode,
            uid: n.uid,
            gid: n.gid,
            mtime: n.mtime,
            atime: n.atime,
            ctime: n.ctime,
            nlink: n.nlink,
            size: n.size,
            link_source: n.link_source.clone(),
            dirty: n.dirty,
            deleted_on: n.deleted_on,
        }
    }
}

impl From<PersistedNode> for FsNode {
    fn from(p: PersistedNode) -> Self {
        FsNode {
            path: p.path,
            name: p.name,
            folder: p.folder,
            mode: p.mode,
            uid: p.uid,
            gid: p.gid,
            mtime: p.mtime,
            atime: p.atime,
            ctime: p.ctime,
            nlink: p.nlink,
            size: p.size,
            link_source: p.link_source,
            dirty: p.dirty,
            deleted_on: p.deleted_on,
            downloading: None,
            uploading: None,
        }
    }
}

pub struct Index {
    nodes: RwLock<HashMap<String, FsNode>>,
    persist_path: Option<PathBuf>,
}

impl Index {
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        Index {
            nodes: RwLock::new(HashMap::new()),
            persist_path,
        }
    }

    /// `get_by_path(path, include_deleted, snapshot)` (spec §4.3).
    pub fn get_by_path(&self, path: &str, include_deleted: bool, snapshot: Option<f64>) -> Option<FsNode> {
        let key = crate::fsnode::normalize(path);
        let nodes = self.nodes.read().unwrap();
        let node = nodes.get(key)?;
        if include_deleted || !node.is_deleted(snapshot) {
            Some(node.clone())
        } else {
            None
        }
    }

    /// Like `get_by_path` but undeletes the node if it was soft-deleted,
    /// matching the original's `get_or_create` helper (`file_system.py`).
    pub fn get_or_create(&self, path: &str) -> FsNode {
        let key = crate::fsnode::normalize(path);
        if let Some(mut node) = self.get_by_path(key, true, None) {
            node.deleted_on = None;
            self.upsert(node.clone());
            node
        } else {
            let (folder, name) = crate::fsnode::split_path(key);
            FsNode {
                path: key.to_string(),
                name,
                folder,
                mode: 0,
                uid: 0,
                gid: 0,
                mtime: 0.0,
                atime: 0.0,
                ctime: 0.0,
                nlink: 1,
                size: 0,
                link_source: None,
                dirty: false,
                deleted_on: None,
                downloading: None,
                uploading: None,
            }
        }
    }

    /// `children(folder_path, snapshot)` (spec §4.3): visible nodes whose
    /// `folder` equals `folder_path`.
    pub fn children(&self, folder_path: &str, snapshot: Option<f64>) -> Vec<FsNode> {
        let folder_path = crate::fsnode::normalize(folder_path);
        let nodes = self.nodes.read().unwrap();
        nodes
            .values()
            .filter(|n| n.folder == folder_path && !n.path.is_empty())
            .filter(|n| !n.is_deleted(snapshot))
            .cloned()
            .collect()
    }

    pub fn upsert(&self, node: FsNode) {
        let mut nodes = self.nodes.write().unwrap();
        nodes.insert(node.path.clone(), node);
    }

    /// Spec names both `upsert` and `save` as index operations; they are
    /// the same write in this implementation (the original's `.save()`
    /// persisted whatever fields were already mutated on the in-memory
    /// row — there is no separate "insert" step to distinguish).
    pub fn save(&self, node: FsNode) {
        self.upsert(node)
    }

    pub fn remove(&self, path: &str) {
        let key = crate::fsnode::normalize(path);
        let mut nodes = self.nodes.write().unwrap();
        nodes.remove(key);
    }

    /// Discards all nodes, used when refreshing from the object store.
    pub fn table_reset(&self) {
        let mut nodes = self.nodes.write().unwrap();
        nodes.clear();
    }

    pub fn persist_to_disk(&self) -> std::io::Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let nodes = self.nodes.read().unwrap();
        let persisted: Vec<PersistedNode> = nodes.values().map(PersistedNode::from).collect();
        let json = serde_json::to_vec(&persisted)?;
        std::fs::write(path, json)
    }

    pub fn load_from_disk(persist_path: PathBuf) -> std::io::Result<Self> {
        let index = Index::new(Some(persist_path.clone()));
        if persist_path.exists() {
            let data = std::fs::read(&persist_path)?;
            let persisted: Vec<PersistedNode> = serde_json::from_slice(&data)?;
            let mut nodes = index.nodes.write().unwrap();
            for p in persisted {
                let node: FsNode = p.into();
                nodes.insert(node.path.clone(), node);
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsnode::FsNode;

    fn node(path: &str) -> FsNode {
        let (folder, name) = crate::fsnode::split_path(path);
        FsNode {
            path: path.to_string(),
            name,
            folder,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            mtime: 0.0,
            atime: 0.0,
            ctime: 0.0,
            nlink: 1,
            size: 0,
            link_source: None,
            dirty: false,
            deleted_on: None,
            downloading: None,
            uploading: None,
        }
    }

    #[test]
    fn get_reconstructs_path_from_folder_and_name() {
        let idx = Index::new(None);
        idx.upsert(node("a/b/c.txt"));
        let n = idx.get_by_path("a/b/c.txt", false, None).unwrap();
        assert_eq!(n.path, "a/b/c.txt");
        let reconstructed = if n.folder.is_empty() {
            n.name.clone()
        } else {
            format!("{}/{}", n.folder, n.name)
        };
        assert_eq!(reconstructed, n.path);
    }

    #[test]
    fn soft_deleted_node_hidden_at_or_after_snapshot() {
        let idx = Index::new(None);
        let mut n = node("x");
        n.deleted_on = Some(100.0);
        idx.upsert(n);

        assert!(idx.get_by_path("x", false, Some(101.0)).is_none());
        assert!(idx.get_by_path("x", false, Some(99.0)).is_some());
        assert!(idx.get_by_path("x", true, Some(101.0)).is_some());
    }

    #[test]
    fn children_filters_by_folder_and_visibility() {
        let idx = Index::new(None);
        idx.upsert(node("d/f"));
        let mut deleted = node("d/g");
        deleted.deleted_on = Some(50.0);
        idx.upsert(deleted);

        let children = idx.children("d", Some(60.0));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "f");
    }

    #[test]
    fn table_reset_is_idempotent_for_refresh() {
        let idx = Index::new(None);
        idx.upsert(node("a"));
        idx.table_reset();
        idx.table_reset();
        assert!(idx.get_by_path("a", true, None).is_none());
    }
}
