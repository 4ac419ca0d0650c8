//! Client facade
//!
//! [`StmClient`] binds a coordinator session to an STM subtree and exposes
//! the whole public surface: subtree management (`init_stm`/`reset_stm`),
//! ref and atom construction, and [`StmClient::transact`], the sole entry
//! point that establishes transactional context.
//!
//! The client is cheap to clone and safe to share across threads; all
//! handles created from it share one watch dispatcher and one hook registry,
//! so watches registered through any handle of a ref fire for commits made
//! through any other handle of the same client.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::atom::TAtom;
use crate::dispatch::WatchDispatcher;
use crate::ref_cell::{ContainerMode, TRef};
use dstm_concurrency::{
    backoff_delay, DistributedRwLock, HookSet, RefResources, Txn, TxnRuntime,
};
use dstm_coordinator::{Coordinator, CreateMode};
use dstm_core::{codec, paths, Error, Result, StmConfig, TransactionState};
use dstm_storage::{CoordinatorContainer, LocalContainer, StateContainer};

pub(crate) struct ClientInner {
    pub(crate) runtime: TxnRuntime,
    pub(crate) dispatcher: WatchDispatcher,
    hooks: DashMap<String, Arc<HookSet>>,
}

impl ClientInner {
    /// The shared hook registry for a ref or atom path
    pub(crate) fn hooks_for(&self, path: &str) -> Arc<HookSet> {
        self.hooks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(HookSet::new()))
            .value()
            .clone()
    }

    /// The retry loop around one transactional block
    pub(crate) fn transact<R, F>(&self, body: F) -> Result<R>
    where
        F: Fn(&mut Txn) -> Result<R>,
    {
        let config = self.runtime.config().clone();
        let deadline = Instant::now() + config.transaction_timeout();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let mut txn = self.runtime.begin(deadline)?;
            let outcome = body(&mut txn)
                .and_then(|value| self.runtime.commit(&mut txn).map(|fires| (value, fires)));
            match outcome {
                Ok((value, fires)) => {
                    for fire in fires {
                        self.dispatcher.enqueue(fire);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retry() => {
                    if txn.state() == TransactionState::Running {
                        // The conflict was signalled from inside the block
                        // (a ref born after the read point); record it.
                        let _ = self
                            .runtime
                            .publish_state(&mut txn, TransactionState::Retry);
                    }
                    if Instant::now() >= deadline {
                        let _ = self
                            .runtime
                            .publish_state(&mut txn, TransactionState::Aborted);
                        return Err(Error::TransactionTimeout);
                    }
                    if attempts > config.max_retries {
                        let _ = self
                            .runtime
                            .publish_state(&mut txn, TransactionState::Aborted);
                        warn!(target: "dstm::txn", attempts, "retry budget exhausted");
                        return Err(Error::RetryExhausted { attempts });
                    }
                    std::thread::sleep(backoff_delay(
                        attempts - 1,
                        config.backoff_initial_ms,
                        config.backoff_max_ms,
                    ));
                }
                Err(e) => {
                    if txn.state() == TransactionState::Running {
                        let _ = self
                            .runtime
                            .publish_state(&mut txn, TransactionState::Aborted);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Handle to one STM subtree through one coordinator session
#[derive(Clone)]
pub struct StmClient {
    inner: Arc<ClientInner>,
}

impl StmClient {
    /// Bind a coordinator session and ensure the subtree exists
    pub fn connect(coord: Arc<dyn Coordinator>, config: StmConfig) -> Result<Self> {
        let client = Self {
            inner: Arc::new(ClientInner {
                runtime: TxnRuntime::new(coord, config),
                dispatcher: WatchDispatcher::start(),
                hooks: DashMap::new(),
            }),
        };
        client.init_stm()?;
        Ok(client)
    }

    /// Idempotently create the subtree skeleton
    pub fn init_stm(&self) -> Result<()> {
        let layout = self.inner.runtime.layout();
        let coord = self.inner.runtime.coordinator();
        for path in [
            layout.root().to_string(),
            layout.history(),
            layout.refs(),
            layout.atoms(),
        ] {
            match coord.create(&path, &[], CreateMode::Persistent) {
                Ok(_) | Err(Error::NodeExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        info!(target: "dstm::client", root = %layout.root(), "stm subtree ready");
        Ok(())
    }

    /// Delete and re-create the subtree
    ///
    /// Destroys every ref, atom, and transaction record under the root.
    /// Intended for test harnesses only.
    pub fn reset_stm(&self) -> Result<()> {
        let layout = self.inner.runtime.layout();
        self.inner
            .runtime
            .coordinator()
            .delete_all(layout.root())?;
        self.inner.hooks.clear();
        warn!(target: "dstm::client", root = %layout.root(), "stm subtree reset");
        self.init_stm()
    }

    /// The client configuration
    pub fn config(&self) -> &StmConfig {
        self.inner.runtime.config()
    }

    /// The coordinator session behind this client
    pub fn coordinator(&self) -> Arc<dyn Coordinator> {
        Arc::clone(self.inner.runtime.coordinator())
    }

    /// Construct (or attach to) a coordinator-backed ref
    ///
    /// If `init` is given and the ref has no committed value yet, the
    /// initial value is seeded through a one-shot transaction.
    pub fn stm_ref<T>(&self, name: &str, init: Option<T>) -> Result<TRef<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        self.stm_ref_in(name, ContainerMode::Coordinator, init)
    }

    /// Construct (or attach to) a ref with an explicit container backend
    pub fn stm_ref_in<T>(
        &self,
        name: &str,
        mode: ContainerMode,
        init: Option<T>,
    ) -> Result<TRef<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        paths::validate_name(name)?;
        let layout = self.inner.runtime.layout();
        let coord = self.inner.runtime.coordinator();
        let root = layout.ref_root(name);
        for path in [root.clone(), paths::ref_txn(&root), paths::ref_lock(&root)] {
            match coord.create(&path, &[], CreateMode::Persistent) {
                Ok(_) | Err(Error::NodeExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let retention = self.config().history_retention;
        let container: Arc<dyn StateContainer> = match mode {
            ContainerMode::Coordinator => Arc::new(CoordinatorContainer::new(
                Arc::clone(coord),
                &root,
                retention,
            )),
            ContainerMode::Local => Arc::new(LocalContainer::open(&root, retention)),
        };
        container.init_state()?;

        let resources = RefResources {
            path: root.clone(),
            container,
            lock: Arc::new(DistributedRwLock::new(
                Arc::clone(coord),
                paths::ref_lock(&root),
            )),
            hooks: self.inner.hooks_for(&root),
        };
        let tref = TRef::new(Arc::clone(&self.inner), name, resources);

        if let Some(value) = init {
            let unbound = self
                .inner
                .runtime
                .latest_committed(tref.resources().container.as_ref())?
                .is_none();
            if unbound {
                let bytes = codec::encode(&value)?;
                let res = tref.resources().clone();
                self.inner.transact(move |txn| txn.stage(&res, bytes.clone()))?;
            }
        }
        Ok(tref)
    }

    /// Construct (or attach to) an atom
    ///
    /// If `init` is given it is seeded through `reset`, replacing any
    /// existing value.
    pub fn atom<T>(&self, name: &str, init: Option<T>) -> Result<TAtom<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        paths::validate_name(name)?;
        let layout = self.inner.runtime.layout();
        let coord = self.inner.runtime.coordinator();
        match coord.create(&layout.atom_root(name), &[], CreateMode::Persistent) {
            Ok(_) | Err(Error::NodeExists { .. }) => {}
            Err(e) => return Err(e),
        }
        let atom = TAtom::new(Arc::clone(&self.inner), name);
        if let Some(value) = init {
            atom.reset(value)?;
        }
        Ok(atom)
    }

    /// Run a transactional block, retrying on conflict
    ///
    /// The block may run several times; it must be pure apart from its ref
    /// operations. On success the block's value from the committing attempt
    /// is returned and watches fire asynchronously.
    pub fn transact<R, F>(&self, body: F) -> Result<R>
    where
        F: Fn(&mut Txn) -> Result<R>,
    {
        self.inner.transact(body)
    }

    /// Block until every already-fired watch callback has run
    ///
    /// Watches are asynchronous by design; tests call this before asserting
    /// on their side effects.
    pub fn await_watches(&self) {
        self.inner.dispatcher.drain();
    }
}
