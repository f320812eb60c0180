//! The kernel-facing attribute cache: a small inode-keyed cache of
//! `FileAttr` values sitting in front of the Metadata Index, so repeated
//! `getattr` calls from the kernel don't all round-trip through the
//! index/lock on a hot path. Ported from the teacher's `fs/cache.rs`
//! `AttributeCache` enum (Ttl/Lru/None variants), generalized from a
//! path key to an inode key since this crate's Mount Handler indexes
//! open state by inode rather than path.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fuser::FileAttr;
use lru::LruCache;

use crate::config::CacheStrategy;

enum Store {
    Ttl { ttl: Duration, map: Mutex<HashMap<u64, (FileAttr, Instant)>> },
    Lru { map: Mutex<LruCache<u64, FileAttr>> },
    None,
}

pub struct AttributeCache {
    store: Store,
}

impl AttributeCache {
    pub fn new(strategy: CacheStrategy, ttl_seconds: u64, lru_capacity: usize) -> Self {
        let store = match strategy {
            CacheStrategy::Ttl => Store::Ttl {
                ttl: Duration::from_secs(ttl_seconds),
                map: Mutex::new(HashMap::new()),
            },
            CacheStrategy::Lru => Store::Lru {
                map: Mutex::new(LruCache::new(
                    NonZeroUsize::new(lru_capacity.max(1)).unwrap(),
                )),
            },
            CacheStrategy::None => Store::None,
        };
        AttributeCache { store }
    }

    pub fn get(&self, ino: u64) -> Option<FileAttr> {
        match &self.store {
            Store::Ttl { ttl, map } => {
                let mut map = map.lock().unwrap();
                match map.get(&ino) {
                    Some((attr, inserted_at)) if inserted_at.elapsed() < *ttl => Some(*attr),
                    Some(_) => {
                        map.remove(&ino);
                        None
                    }
                    None => None,
                }
            }
            Store::Lru { map } => map.lock().unwrap().get(&ino).copied(),
            Store::None => None,
        }
    }

    pub fn put(&self, ino: u64, attr: FileAttr) {
        match &self.store {
            Store::Ttl { map, .. } => {
                map.lock().unwrap().insert(ino, (attr, Instant::now()));
            }
            Store::Lru { map } => {
                map.lock().unwrap().put(ino, attr);
            }
            Store::None => {}
        }
    }

    pub fn remove(&self, ino: u64) {
        match &self.store {
            Store::Ttl { map, .. } => {
                map.lock().unwrap().remove(&ino);
            }
            Store::Lru { map } => {
                map.lock().unwrap().pop(&ino);
            }
            Store::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_attr() -> FileAttr {
        FsNodeStub::attr()
    }

    struct FsNodeStub;
    impl FsNodeStub {
        fn attr() -> FileAttr {
            use std::time::SystemTime;
            FileAttr {
                ino: 1,
                size: 0,
                blocks: 0,
                atime: SystemTime::UNIX_EPOCH,
                mtime: SystemTime::UNIX_EPOCH,
                ctime: SystemTime::UNIX_EPOCH,
                crtime: SystemTime::UNIX_EPOCH,
                kind: fuser::FileType::RegularFile,
                perm: 0o644,
                nlink: 1,
                uid: 0,
                gid: 0,
                rdev: 0,
                flags: 0,
                blksize: 4096,
            }
        }
    }

    #[test]
    fn none_strategy_never_caches() {
        let cache = AttributeCache::new(CacheStrategy::None, 60, 10);
        cache.put(1, dummy_attr());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn ttl_strategy_expires_entries() {
        let cache = AttributeCache::new(CacheStrategy::Ttl, 0, 10);
        cache.put(1, dummy_attr());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn lru_strategy_retains_until_evicted() {
        let cache = AttributeCache::new(CacheStrategy::Lru, 60, 1);
        cache.put(1, dummy_attr());
        assert!(cache.get(1).is_some());
        cache.put(2, dummy_attr());
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }
}
