//! The Job Executor: a single background thread draining a deque of
//! deferred [`FileOperation`]s, enforcing the critical rule that at most
//! one remote I/O is ever in flight per path at a time (spec §4.6,
//! "Critical rule").
//!
//! Grounded directly on the original's `_job_executor_thread_main` and
//! `FileOperation` class (`file_system.py`): pop from the front, requeue
//! to the back when the target node is missing or already marked
//! `uploading`/`downloading`, otherwise run `pre_execution()` then
//! `operation(*args)`.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::index::Index;

/// A deferred operation on `path`. `pre_execution` (if present) runs
/// once, immediately before `execute`, and is used to do work that must
/// happen right before the real operation but cannot happen at enqueue
/// time (e.g. `refresh_cache_file` in deferred rename, spec §4.6).
pub struct FileOperation {
    pub path: String,
    pub pre_execution: Option<Box<dyn FnOnce() + Send>>,
    pub execute: Box<dyn FnOnce() + Send>,
    pub attempt: u32,
}

pub struct JobExecutor {
    queue: Arc<(Mutex<VecDeque<FileOperation>>, Condvar)>,
    index: Arc<Index>,
    max_attempts: u32,
    poll_interval: Duration,
    shutdown: Arc<Mutex<bool>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl JobExecutor {
    pub fn new(index: Arc<Index>, max_attempts: u32, poll_interval: Duration) -> Self {
        JobExecutor {
            queue: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
            index,
            max_attempts,
            poll_interval,
            shutdown: Arc::new(Mutex::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, op: FileOperation) {
        let (lock, cvar) = &*self.queue;
        let mut queue = lock.lock().unwrap();
        queue.push_back(op);
        cvar.notify_one();
    }

    fn requeue_front(&self, mut op: FileOperation) {
        op.attempt += 1;
        let (lock, cvar) = &*self.queue;
        let mut queue = lock.lock().unwrap();
        if op.attempt <= self.max_attempts {
            queue.push_front(op);
        } else {
            tracing::error!(path = %op.path, "job executor giving up after max attempts");
        }
        cvar.notify_one();
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        let handle = std::thread::spawn(move || this.run());
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn shutdown(&self) {
        *self.shutdown.lock().unwrap() = true;
        let (_, cvar) = &*self.queue;
        cvar.notify_all();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        loop {
            if *self.shutdown.lock().unwrap() {
                return;
            }

            let op = {
                let (lock, cvar) = &*self.queue;
                let mut queue = lock.lock().unwrap();
                while queue.is_empty() {
                    let (guard, timeout) = cvar.wait_timeout(queue, self.poll_interval).unwrap();
                    queue = guard;
                    if *self.shutdown.lock().unwrap() {
                        return;
                    }
                    if timeout.timed_out() && queue.is_empty() {
                        continue;
                    }
                }
                queue.pop_front()
            };

            let Some(op) = op else { continue };

            let node = self.index.get_by_path(&op.path, true, None);
            let blocked = match &node {
                None => true,
                Some(n) => n.uploading.is_some() || n.downloading.is_some(),
            };

            if blocked {
                self.requeue_front(op);
                std::thread::sleep(self.poll_interval);
                continue;
            }

            let FileOperation {
                pre_execution, execute, ..
            } = op;
            if let Some(pre) = pre_execution {
                pre();
            }
            execute();
        }
    }
}
