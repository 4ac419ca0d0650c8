//! Distributed fair read/write lock
//!
//! Built on ephemeral-sequential children of a lock directory:
//!
//! - a writer creates `write-<seq>` and owns the lock once no child of any
//!   kind has a lower sequence;
//! - a reader creates `read-<seq>` and proceeds once no *write* child has a
//!   lower sequence;
//! - a blocked waiter watches its nearest lower-sequence blocker and
//!   re-checks when that node is deleted. Watching only the predecessor
//!   avoids a thundering herd on release.
//!
//! Sequence numbers are assigned by the coordinator per parent, across both
//! prefixes, which gives FIFO ordering of waiters. Guards delete their node
//! on drop; session loss releases the lock through ephemerality.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use dstm_coordinator::{Coordinator, CreateMode, WatchEvent};
use dstm_core::types::sequential_suffix;
use dstm_core::{Error, Result};

const WRITE_PREFIX: &str = "write-";
const READ_PREFIX: &str = "read-";

/// Fair read/write lock keyed by a coordinator directory
pub struct DistributedRwLock {
    coord: Arc<dyn Coordinator>,
    dir: String,
}

impl DistributedRwLock {
    /// Build a lock over an existing lock directory
    pub fn new(coord: Arc<dyn Coordinator>, dir: impl Into<String>) -> Self {
        Self {
            coord,
            dir: dir.into(),
        }
    }

    /// The lock directory path
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Acquire the shared (read) side, waiting no longer than `deadline`
    pub fn read(&self, deadline: Instant) -> Result<LockGuard> {
        self.acquire(READ_PREFIX, deadline)
    }

    /// Acquire the exclusive (write) side, waiting no longer than `deadline`
    pub fn write(&self, deadline: Instant) -> Result<LockGuard> {
        self.acquire(WRITE_PREFIX, deadline)
    }

    fn acquire(&self, prefix: &str, deadline: Instant) -> Result<LockGuard> {
        let created = self.coord.create(
            &format!("{}/{prefix}", self.dir),
            &[],
            CreateMode::EphemeralSequential,
        )?;
        let my_name = created.rsplit('/').next().unwrap_or(&created);
        let my_seq = sequential_suffix(my_name).ok_or_else(|| {
            Error::Coordinator(format!("unparseable lock node name: {created}"))
        })?;
        let exclusive = prefix == WRITE_PREFIX;

        // The guard owns the queue node from here on; any early return
        // removes it.
        let guard = LockGuard {
            coord: Arc::clone(&self.coord),
            path: created.clone(),
        };

        loop {
            let blocker = self
                .coord
                .children(&self.dir)?
                .into_iter()
                .filter_map(|name| sequential_suffix(&name).map(|seq| (seq, name)))
                .filter(|(seq, name)| {
                    *seq < my_seq && (exclusive || name.starts_with(WRITE_PREFIX))
                })
                .max_by_key(|(seq, _)| *seq);

            let Some((_, predecessor)) = blocker else {
                trace!(target: "dstm::lock", node = %created, "lock acquired");
                return Ok(guard);
            };

            let watch = self
                .coord
                .watch_delete(&format!("{}/{predecessor}", self.dir))?;
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TransactionTimeout);
            }
            match watch.wait(deadline - now) {
                Some(WatchEvent::SessionExpired) => return Err(Error::SessionLost),
                Some(_) => continue,
                None => return Err(Error::TransactionTimeout),
            }
        }
    }
}

/// RAII handle to an acquired lock side
///
/// Dropping the guard deletes the queue node, releasing the lock and waking
/// the next waiter.
pub struct LockGuard {
    coord: Arc<dyn Coordinator>,
    path: String,
}

impl LockGuard {
    /// Path of the queue node this guard owns
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.coord.delete(&self.path) {
            // Session loss already released the node for us.
            debug!(target: "dstm::lock", node = %self.path, error = %e, "lock release skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dstm_coordinator::MemoryCoordinator;
    use static_assertions::assert_impl_all;
    use std::sync::mpsc;
    use std::time::Duration;

    assert_impl_all!(DistributedRwLock: Send, Sync);
    assert_impl_all!(LockGuard: Send);

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    fn setup() -> (MemoryCoordinator, Arc<DistributedRwLock>) {
        let service = MemoryCoordinator::new();
        let session = service.session();
        session
            .create("/lock", &[], CreateMode::Persistent)
            .unwrap();
        let lock = Arc::new(DistributedRwLock::new(
            Arc::new(session),
            "/lock".to_string(),
        ));
        (service, lock)
    }

    #[test]
    fn test_uncontended_write() {
        let (_svc, lock) = setup();
        let guard = lock.write(far()).unwrap();
        assert!(guard.path().contains("write-"));
    }

    #[test]
    fn test_readers_run_in_parallel() {
        let (_svc, lock) = setup();
        let g1 = lock.read(far()).unwrap();
        let g2 = lock.read(far()).unwrap();
        drop(g1);
        drop(g2);
    }

    #[test]
    fn test_writer_excludes_writer() {
        let (_svc, lock) = setup();
        let g1 = lock.write(far()).unwrap();
        assert!(matches!(
            lock.write(soon()),
            Err(Error::TransactionTimeout)
        ));
        drop(g1);
        lock.write(far()).unwrap();
    }

    #[test]
    fn test_writer_excludes_reader() {
        let (_svc, lock) = setup();
        let g = lock.write(far()).unwrap();
        assert!(matches!(lock.read(soon()), Err(Error::TransactionTimeout)));
        drop(g);
        lock.read(far()).unwrap();
    }

    #[test]
    fn test_reader_blocks_writer_until_released() {
        let (_svc, lock) = setup();
        let reader = lock.read(far()).unwrap();

        let (tx, rx) = mpsc::channel();
        let lock2 = Arc::clone(&lock);
        let handle = std::thread::spawn(move || {
            let g = lock2.write(far()).unwrap();
            tx.send(()).unwrap();
            drop(g);
        });

        // Writer must still be queued while the reader holds the lock.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(reader);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_fifo_writer_before_later_reader() {
        let (_svc, lock) = setup();
        let first = lock.read(far()).unwrap();

        let (wtx, wrx) = mpsc::channel();
        let lock_w = Arc::clone(&lock);
        let writer = std::thread::spawn(move || {
            let g = lock_w.write(far()).unwrap();
            wtx.send(()).unwrap();
            // Hold briefly so the late reader observably queues behind us.
            std::thread::sleep(Duration::from_millis(50));
            drop(g);
        });

        // Give the writer time to enqueue, then queue a reader behind it.
        std::thread::sleep(Duration::from_millis(50));
        let (rtx, rrx) = mpsc::channel();
        let lock_r = Arc::clone(&lock);
        let reader = std::thread::spawn(move || {
            let g = lock_r.read(far()).unwrap();
            rtx.send(()).unwrap();
            drop(g);
        });

        // The late reader must wait for the queued writer.
        assert!(rrx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(first);
        wrx.recv_timeout(Duration::from_secs(2)).unwrap();
        rrx.recv_timeout(Duration::from_secs(2)).unwrap();
        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_session_expiry_releases_lock() {
        let service = MemoryCoordinator::new();
        let holder = service.session();
        holder.create("/lock", &[], CreateMode::Persistent).unwrap();
        let holder_id = holder.session_id();
        let holder_lock = DistributedRwLock::new(Arc::new(holder), "/lock".to_string());
        let guard = holder_lock.write(far()).unwrap();

        let other = service.session();
        let other_lock = DistributedRwLock::new(Arc::new(other), "/lock".to_string());
        assert!(other_lock.write(soon()).is_err());

        service.expire(holder_id);
        other_lock.write(far()).unwrap();

        // The dead session's guard drop is a no-op, not a panic.
        drop(guard);
    }
}
