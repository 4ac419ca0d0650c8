//! The transaction protocol
//!
//! [`TxnRuntime`] binds a coordinator session to the STM subtree and drives
//! every durable step of a transaction's life:
//!
//! ```text
//! begin: sequential history node  →  id = read point, state RUNNING
//! read:  short reader lock  →  newest COMMITTED version ≤ read point
//! commit:
//!   writer locks in path order  →  read-set verify  →  validators →
//!   COMMITTING + intent markers  →  version appends  →  COMMITTED →
//!   markers removed, locks released  →  watch fires handed back
//! ```
//!
//! Version tags are classified through the tagging transaction's durable
//! state, so an entry appended by a committer that died mid-flight (state
//! stuck at `COMMITTING`) is invisible to every reader; the prior version is
//! used instead. [`TxnRuntime::scrub`] removes such orphans lazily.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::transaction::{RefResources, Txn};
use dstm_coordinator::{Coordinator, CreateMode};
use dstm_core::paths;
use dstm_core::{Error, Result, StmConfig, StmLayout, TransactionState, TxnId};
use dstm_storage::StateContainer;

/// A post-commit watch notification, ready for the dispatcher
pub struct WatchFire {
    /// Ref or atom path the mutation happened on
    pub path: String,
    /// Hook registry whose watches should run
    pub hooks: Arc<crate::hooks::HookSet>,
    /// Encoded value before the commit, if one existed
    pub old: Option<Vec<u8>>,
    /// Encoded value after the commit
    pub new: Vec<u8>,
}

impl std::fmt::Debug for WatchFire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchFire")
            .field("path", &self.path)
            .field("old", &self.old)
            .field("new", &self.new)
            .finish()
    }
}

enum LatestAt {
    /// Newest committed version at or below the bound
    Value(TxnId, Vec<u8>),
    /// Nothing committed at or below the bound survives retention
    Pruned,
    /// The ref has no committed version at or below the bound and nothing
    /// was ever pruned: it was created after the bound
    Missing,
}

/// Protocol driver bound to one coordinator session and one subtree
pub struct TxnRuntime {
    coord: Arc<dyn Coordinator>,
    layout: StmLayout,
    config: StmConfig,
}

impl TxnRuntime {
    /// Bind a runtime to a coordinator session
    pub fn new(coord: Arc<dyn Coordinator>, config: StmConfig) -> Self {
        let layout = StmLayout::new(&config.root);
        Self {
            coord,
            layout,
            config,
        }
    }

    /// The coordinator session
    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coord
    }

    /// The subtree layout
    pub fn layout(&self) -> &StmLayout {
        &self.layout
    }

    /// The client configuration
    pub fn config(&self) -> &StmConfig {
        &self.config
    }

    /// Start a new attempt: allocate an id and publish `RUNNING`
    pub fn begin(&self, deadline: Instant) -> Result<Txn> {
        let created = self.coord.create(
            &self.layout.txn_prefix(),
            &TransactionState::Running.encode(),
            CreateMode::PersistentSequential,
        )?;
        let id = TxnId::from_sequential(&created)?;
        debug!(target: "dstm::txn", txn = %id, "transaction started");
        Ok(Txn::new(id, deadline))
    }

    /// Durable state of any transaction, own or peer
    ///
    /// A missing history node reads as `Aborted`: nothing tagged by it can
    /// ever have committed.
    pub fn txn_state(&self, id: TxnId) -> Result<TransactionState> {
        match self.coord.read(&self.layout.txn_node(id))? {
            Some((data, _)) => TransactionState::decode(&data),
            None => Ok(TransactionState::Aborted),
        }
    }

    /// Publish a lifecycle transition durably
    ///
    /// # Errors
    /// - `InvalidState` if the transition is illegal from the current state
    pub fn publish_state(&self, txn: &mut Txn, next: TransactionState) -> Result<()> {
        if !txn.state().can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "transaction {} cannot move {} -> {next}",
                txn.id(),
                txn.state()
            )));
        }
        self.coord
            .write(&self.layout.txn_node(txn.id()), &next.encode(), None)?;
        txn.set_state(next);
        Ok(())
    }

    /// Transactional read of one ref
    ///
    /// Cache hit first; otherwise a short reader lock, then the newest
    /// committed version at or below the read point.
    ///
    /// # Errors
    /// - `StaleRead` when retention has discarded everything readable
    /// - `RetryConflict` when the ref was created after the read point
    pub fn read_ref(&self, txn: &mut Txn, resources: &RefResources) -> Result<Vec<u8>> {
        txn.ensure_running()?;
        if let Some(bytes) = txn.cached(&resources.path) {
            return Ok(bytes.to_vec());
        }
        if Instant::now() >= txn.deadline() {
            let _ = self.publish_state(txn, TransactionState::Aborted);
            return Err(Error::TransactionTimeout);
        }

        let _guard = resources.lock.read(txn.deadline())?;
        match self.latest_committed_at(resources.container.as_ref(), txn.read_point())? {
            LatestAt::Value(version, bytes) => {
                txn.record_read(resources, version, bytes.clone());
                debug!(
                    target: "dstm::txn",
                    txn = %txn.id(), path = %resources.path, version = %version,
                    "ref read"
                );
                Ok(bytes)
            }
            LatestAt::Pruned => Err(Error::StaleRead {
                path: resources.path.clone(),
                requested: txn.read_point(),
            }),
            LatestAt::Missing => Err(Error::RetryConflict {
                path: resources.path.clone(),
            }),
        }
    }

    /// Newest committed version of a ref, unbounded
    pub fn latest_committed(
        &self,
        container: &dyn StateContainer,
    ) -> Result<Option<(TxnId, Vec<u8>)>> {
        match self.latest_committed_at(container, TxnId(u64::MAX))? {
            LatestAt::Value(version, bytes) => Ok(Some((version, bytes))),
            LatestAt::Pruned | LatestAt::Missing => Ok(None),
        }
    }

    fn latest_committed_at(&self, container: &dyn StateContainer, at: TxnId) -> Result<LatestAt> {
        for version in container.versions()?.into_iter().rev() {
            if version > at {
                continue;
            }
            // Entries tagged by transactions that are not COMMITTED are
            // invisible; the prior version is used instead.
            if self.txn_state(version)? != TransactionState::Committed {
                continue;
            }
            match container.get_state(version) {
                Ok(bytes) => return Ok(LatestAt::Value(version, bytes)),
                // Pruned between listing and read; fall through to the
                // watermark check.
                Err(Error::StaleRead { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        if container.pruned_through()?.is_some() {
            Ok(LatestAt::Pruned)
        } else {
            Ok(LatestAt::Missing)
        }
    }

    /// Commit the attempt
    ///
    /// Returns the watch notifications to dispatch after the visibility
    /// boundary. On a read-set conflict the attempt is marked `RETRY` and
    /// the internal `RetryConflict` signal is returned for the retry loop.
    pub fn commit(&self, txn: &mut Txn) -> Result<Vec<WatchFire>> {
        txn.ensure_running()?;
        if Instant::now() >= txn.deadline() {
            let _ = self.publish_state(txn, TransactionState::Aborted);
            return Err(Error::TransactionTimeout);
        }

        if txn.is_read_only() {
            self.publish_state(txn, TransactionState::Committed)?;
            debug!(target: "dstm::txn", txn = %txn.id(), "read-only transaction committed");
            return Ok(Vec::new());
        }

        struct WriteItem {
            path: String,
            resources: RefResources,
            bytes: Vec<u8>,
        }
        struct ReadItem {
            path: String,
            resources: RefResources,
            original: Option<Vec<u8>>,
        }

        let writes: Vec<WriteItem> = txn
            .slots()
            .filter_map(|(path, slot)| {
                slot.pending.clone().map(|bytes| WriteItem {
                    path: path.clone(),
                    resources: slot.resources.clone(),
                    bytes,
                })
            })
            .collect();
        let reads: Vec<ReadItem> = txn
            .slots()
            .filter(|(_, slot)| slot.observed.is_some())
            .map(|(path, slot)| ReadItem {
                path: path.clone(),
                resources: slot.resources.clone(),
                original: slot.original.clone(),
            })
            .collect();

        // Writer locks in lexicographic path order; the slot map's own
        // ordering makes this deterministic across all committers.
        let mut guards = Vec::with_capacity(writes.len());
        for w in &writes {
            match w.resources.lock.write(txn.deadline()) {
                Ok(guard) => guards.push(guard),
                Err(e) => {
                    drop(guards);
                    let _ = self.publish_state(txn, TransactionState::Aborted);
                    return Err(e);
                }
            }
        }

        // Read-set verification: a committer newer than the read point that
        // changed the bytes we based this transaction on forces a retry.
        for r in &reads {
            let conflicted = match self.latest_committed(r.resources.container.as_ref())? {
                Some((latest, bytes)) => {
                    latest > txn.read_point() && r.original.as_deref() != Some(bytes.as_slice())
                }
                None => true,
            };
            if conflicted {
                drop(guards);
                self.publish_state(txn, TransactionState::Retry)?;
                debug!(
                    target: "dstm::txn",
                    txn = %txn.id(), path = %r.path,
                    "read-set conflict, will retry"
                );
                return Err(Error::RetryConflict {
                    path: r.path.clone(),
                });
            }
        }

        // Validators see the prospective new values before any intent is
        // published. Rejection aborts the whole transaction.
        for w in &writes {
            if let Err(e) = w.resources.hooks.validate(&w.path, &w.bytes) {
                drop(guards);
                let _ = self.publish_state(txn, TransactionState::Aborted);
                warn!(
                    target: "dstm::txn",
                    txn = %txn.id(), path = %w.path,
                    "validator rejected commit"
                );
                return Err(e);
            }
        }

        // Old values for watches, captured while we still hold the locks
        // and before the new versions land.
        let mut olds: Vec<Option<Vec<u8>>> = Vec::with_capacity(writes.len());
        for w in &writes {
            if w.resources.hooks.has_watches() {
                olds.push(
                    self.latest_committed(w.resources.container.as_ref())?
                        .map(|(_, bytes)| bytes),
                );
            } else {
                olds.push(None);
            }
        }

        // Publish intent, then write the versions.
        self.publish_state(txn, TransactionState::Committing)?;
        for w in &writes {
            let marker = format!("{}/{}", paths::ref_txn(&w.path), txn.id().node_name());
            match self.coord.create(&marker, &[], CreateMode::Persistent) {
                Ok(_) | Err(Error::NodeExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        for w in &writes {
            w.resources.container.set_state(txn.id(), &w.bytes)?;
        }

        // The visibility boundary.
        self.publish_state(txn, TransactionState::Committed)?;
        info!(
            target: "dstm::txn",
            txn = %txn.id(), refs = writes.len(),
            "transaction committed"
        );

        for w in &writes {
            let marker = format!("{}/{}", paths::ref_txn(&w.path), txn.id().node_name());
            let _ = self.coord.delete(&marker);
        }
        drop(guards);

        let fires = writes
            .into_iter()
            .zip(olds)
            .filter(|(w, _)| w.resources.hooks.has_watches())
            .map(|(w, old)| WatchFire {
                path: w.path,
                hooks: Arc::clone(&w.resources.hooks),
                old,
                new: w.bytes,
            })
            .collect();
        Ok(fires)
    }

    /// Remove orphaned history entries and stale intent markers from a ref
    ///
    /// Holding the ref's write lock proves no committer is alive, so every
    /// entry whose transaction is not `COMMITTED` is an orphan: its
    /// transaction is first finished off as `ABORTED`, then the entry is
    /// discarded. Returns the number of entries removed.
    pub fn scrub(&self, resources: &RefResources, deadline: Instant) -> Result<usize> {
        let _guard = resources.lock.write(deadline)?;
        let mut removed = 0;
        for version in resources.container.versions()? {
            let state = self.txn_state(version)?;
            if state == TransactionState::Committed {
                continue;
            }
            if !state.is_terminal() {
                match self.coord.write(
                    &self.layout.txn_node(version),
                    &TransactionState::Aborted.encode(),
                    None,
                ) {
                    Ok(_) | Err(Error::NoNode { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            resources.container.remove_state(version)?;
            removed += 1;
        }
        let txn_dir = paths::ref_txn(&resources.path);
        if let Ok(markers) = self.coord.children(&txn_dir) {
            for marker in markers {
                let _ = self.coord.delete(&format!("{txn_dir}/{marker}"));
            }
        }
        if removed > 0 {
            debug!(
                target: "dstm::txn",
                path = %resources.path, removed,
                "scrubbed orphaned history entries"
            );
        }
        Ok(removed)
    }
}
