//! Watch dispatcher
//!
//! Watch callbacks run on a dedicated worker thread, never on the committer:
//! the commit path only enqueues a job per mutated ref or atom. Callbacks
//! execute under `catch_unwind`; a panicking watch is logged and discarded
//! and can never poison a commit or starve other watches.
//!
//! `drain()` blocks until every enqueued job has finished executing, which
//! is what test code uses before asserting on watch side effects.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

use dstm_concurrency::{WatchFire, WatchFn};

struct Job {
    path: String,
    watchers: Vec<WatchFn>,
    old: Option<Vec<u8>>,
    new: Vec<u8>,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    executing: bool,
}

struct DispatchInner {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
}

/// Owner of the watch worker thread
pub(crate) struct WatchDispatcher {
    inner: Arc<DispatchInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WatchDispatcher {
    /// Spawn the worker
    pub(crate) fn start() -> Self {
        let inner = Arc::new(DispatchInner {
            queue: Mutex::new(Queue::default()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("dstm-watch".to_string())
            .spawn(move || worker_loop(&worker_inner))
            .expect("failed to spawn watch dispatcher thread");
        Self {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue one post-commit notification
    ///
    /// The watcher snapshot is taken here, so watches added after the
    /// mutation do not observe it.
    pub(crate) fn enqueue(&self, fire: WatchFire) {
        let watchers = fire.hooks.watchers();
        if watchers.is_empty() {
            return;
        }
        let mut queue = self.inner.queue.lock();
        queue.jobs.push_back(Job {
            path: fire.path,
            watchers,
            old: fire.old,
            new: fire.new,
        });
        self.inner.work_ready.notify_one();
    }

    /// Block until the queue is empty and no job is executing
    pub(crate) fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.jobs.is_empty() || queue.executing {
            self.inner.idle.wait(&mut queue);
        }
    }
}

impl Drop for WatchDispatcher {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.work_ready.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: &DispatchInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    queue.executing = true;
                    break job;
                }
                if inner.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        for watch in &job.watchers {
            let result = catch_unwind(AssertUnwindSafe(|| {
                watch(job.old.as_deref(), &job.new);
            }));
            if result.is_err() {
                warn!(
                    target: "dstm::watch",
                    path = %job.path,
                    "watch callback panicked; discarding"
                );
            }
        }

        let mut queue = inner.queue.lock();
        queue.executing = false;
        if queue.jobs.is_empty() {
            inner.idle.notify_all();
        }
    }
}
