//! Concurrency control for the distributed STM
//!
//! This crate owns everything between the coordinator seam and the typed
//! public API:
//!
//! - [`DistributedRwLock`] — the fair read/write lock each ref's mutations
//!   are serialized by;
//! - [`Txn`] — the per-attempt transaction record (read set, write set,
//!   point-in-time cache, lifecycle state);
//! - [`TxnRuntime`] — the protocol itself: id allocation, the transactional
//!   read path, and the commit sequence (lock → verify → validate →
//!   COMMITTING → version writes → COMMITTED → watch fan-out);
//! - [`HookSet`] — the type-erased validator and watch registry a ref or
//!   atom carries;
//! - [`backoff_delay`] — jittered exponential retry backoff.
//!
//! Everything here works on encoded bytes; typed decode/encode lives in the
//! facade crate.

pub mod hooks;
pub mod lock;
pub mod retry;
pub mod runtime;
pub mod transaction;

pub use hooks::{HookSet, Validator, WatchFn};
pub use lock::{DistributedRwLock, LockGuard};
pub use retry::backoff_delay;
pub use runtime::{TxnRuntime, WatchFire};
pub use transaction::{RefResources, RefSlot, Txn};
