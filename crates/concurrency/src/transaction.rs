//! Per-attempt transaction record
//!
//! A [`Txn`] is one attempt of a transactional block: it carries the
//! attempt's coordinator-assigned id (which doubles as the read point), the
//! deadline, a local mirror of the durable lifecycle state, and one
//! [`RefSlot`] per ref the block touched.
//!
//! Slots live in a `BTreeMap` keyed by ref path; iterating the map at
//! commit time therefore yields refs in lexicographic path order, which is
//! the deterministic (deadlock-free) write-lock order.
//!
//! Reads and writes are staged purely in memory; the only coordinator
//! traffic before commit is the version lookup of a first read.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::hooks::HookSet;
use crate::lock::DistributedRwLock;
use dstm_core::{Error, Result, TransactionState, TxnId};
use dstm_storage::StateContainer;

/// Everything the protocol needs to operate on one ref
///
/// Handles stash a clone of this into the transaction on first touch, so
/// the commit path can reach each ref's container, lock, and hooks without
/// a registry lookup.
#[derive(Clone)]
pub struct RefResources {
    /// The ref's subtree root path
    pub path: String,
    /// Versioned backing store
    pub container: Arc<dyn StateContainer>,
    /// Per-ref writer/reader lock
    pub lock: Arc<DistributedRwLock>,
    /// Validator and watch registry
    pub hooks: Arc<HookSet>,
}

/// Per-ref record inside one transaction attempt
pub struct RefSlot {
    /// Resources captured on first touch
    pub resources: RefResources,
    /// Version observed by the first committed-state read (read-set entry)
    pub observed: Option<TxnId>,
    /// Bytes observed by that first read, for commit-time comparison and
    /// watch old-values
    pub original: Option<Vec<u8>>,
    /// Point-in-time value for this transaction; staged writes overwrite it
    pub cached: Option<Vec<u8>>,
    /// Staged write (write-set entry)
    pub pending: Option<Vec<u8>>,
}

impl RefSlot {
    fn new(resources: RefResources) -> Self {
        Self {
            resources,
            observed: None,
            original: None,
            cached: None,
            pending: None,
        }
    }
}

/// One attempt of a transactional block
pub struct Txn {
    id: TxnId,
    read_point: TxnId,
    state: TransactionState,
    deadline: Instant,
    slots: BTreeMap<String, RefSlot>,
}

impl Txn {
    pub(crate) fn new(id: TxnId, deadline: Instant) -> Self {
        Self {
            id,
            read_point: id,
            state: TransactionState::Running,
            deadline,
            slots: BTreeMap::new(),
        }
    }

    /// This attempt's transaction id
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// The read point all reads are anchored at
    pub fn read_point(&self) -> TxnId {
        self.read_point
    }

    /// Local mirror of the durable lifecycle state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Deadline shared by every attempt of the enclosing `transact` call
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Fail unless the transaction is still accepting operations
    pub fn ensure_running(&self) -> Result<()> {
        if self.state == TransactionState::Running {
            Ok(())
        } else {
            Err(Error::NoActiveTransaction)
        }
    }

    /// The point-in-time value recorded for `path`, if any
    pub fn cached(&self, path: &str) -> Option<&[u8]> {
        self.slots.get(path).and_then(|s| s.cached.as_deref())
    }

    /// Record the result of a first read from a ref's history
    ///
    /// Later reads of the same ref are served from the cache and do not
    /// reach this; `observed`/`original` keep their first values even if a
    /// staged write later replaces the cache.
    pub fn record_read(&mut self, resources: &RefResources, version: TxnId, bytes: Vec<u8>) {
        let slot = self.slot_mut(resources);
        if slot.observed.is_none() {
            slot.observed = Some(version);
            slot.original = Some(bytes.clone());
        }
        slot.cached = Some(bytes);
    }

    /// Stage a write: write-set entry plus cache update, no coordinator
    /// traffic
    ///
    /// # Errors
    /// - `NoActiveTransaction` if the attempt is no longer running
    pub fn stage(&mut self, resources: &RefResources, bytes: Vec<u8>) -> Result<()> {
        self.ensure_running()?;
        let slot = self.slot_mut(resources);
        slot.cached = Some(bytes.clone());
        slot.pending = Some(bytes);
        Ok(())
    }

    fn slot_mut(&mut self, resources: &RefResources) -> &mut RefSlot {
        self.slots
            .entry(resources.path.clone())
            .or_insert_with(|| RefSlot::new(resources.clone()))
    }

    /// Slots in lexicographic path order
    pub fn slots(&self) -> impl Iterator<Item = (&String, &RefSlot)> {
        self.slots.iter()
    }

    /// Whether the attempt staged no writes
    pub fn is_read_only(&self) -> bool {
        self.slots.values().all(|s| s.pending.is_none())
    }

    /// Number of refs in the read set
    pub fn read_count(&self) -> usize {
        self.slots.values().filter(|s| s.observed.is_some()).count()
    }

    /// Number of refs in the write set
    pub fn write_count(&self) -> usize {
        self.slots.values().filter(|s| s.pending.is_some()).count()
    }
}
