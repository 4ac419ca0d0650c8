//! Distributed refs
//!
//! A [`TRef<T>`] is a typed handle to a named distributed ref. All mutation
//! happens inside a transaction: the handle threads the explicit [`Txn`]
//! context through `get`/`set`/`alter`, which keeps transactional scope
//! auditable. There is no hidden thread-local context to mutate outside of
//! one, and using a finished handle fails with `NoActiveTransaction`.
//!
//! `read()` is the only non-transactional operation: it takes a brief
//! reader lock and returns the latest committed value.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::client::ClientInner;
use dstm_concurrency::{RefResources, Txn, Validator};
use dstm_core::{codec, Error, Result};
use dstm_storage::StateContainer;

/// Which backing store a ref's version chain lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerMode {
    /// Version chain in the coordinator (the distributed default)
    Coordinator,
    /// Version chain in process memory; same-host sharing only, for
    /// benchmarking and tests
    Local,
}

/// Typed handle to a named distributed ref
pub struct TRef<T> {
    inner: Arc<ClientInner>,
    name: String,
    resources: RefResources,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            name: self.name.clone(),
            resources: self.resources.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> TRef<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(inner: Arc<ClientInner>, name: &str, resources: RefResources) -> Self {
        Self {
            inner,
            name: name.to_string(),
            resources,
            _marker: PhantomData,
        }
    }

    pub(crate) fn resources(&self) -> &RefResources {
        &self.resources
    }

    /// The ref's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ref's coordinator path
    pub fn path(&self) -> &str {
        &self.resources.path
    }

    /// Latest committed value, outside any transaction
    ///
    /// # Errors
    /// - `Unbound` if nothing was ever committed to this ref
    pub fn read(&self) -> Result<T> {
        let deadline = Instant::now() + self.inner.runtime.config().transaction_timeout();
        let _guard = self.resources.lock.read(deadline)?;
        match self
            .inner
            .runtime
            .latest_committed(self.resources.container.as_ref())?
        {
            Some((_, bytes)) => codec::decode(&bytes),
            None => Err(Error::Unbound {
                path: self.resources.path.clone(),
            }),
        }
    }

    /// Transactional read: this transaction's point-in-time value
    pub fn get(&self, txn: &mut Txn) -> Result<T> {
        let bytes = self.inner.runtime.read_ref(txn, &self.resources)?;
        codec::decode(&bytes)
    }

    /// Stage `value` as this transaction's new value for the ref
    pub fn set(&self, txn: &mut Txn, value: T) -> Result<()> {
        let bytes = codec::encode(&value)?;
        txn.stage(&self.resources, bytes)
    }

    /// Apply `f` to the current in-transaction value and stage the result
    ///
    /// Returns the staged value.
    pub fn alter<F>(&self, txn: &mut Txn, f: F) -> Result<T>
    where
        F: FnOnce(T) -> T,
    {
        let current = self.get(txn)?;
        let next = f(current);
        let bytes = codec::encode(&next)?;
        txn.stage(&self.resources, bytes)?;
        Ok(next)
    }

    /// Commuting variant of [`TRef::alter`]
    ///
    /// Implemented as a plain `alter`: the update function runs against the
    /// in-transaction value and conflicts are detected normally, rather
    /// than re-applying the function at commit time. Callers get `alter`
    /// semantics with a commute-shaped signature.
    pub fn commute<F>(&self, txn: &mut Txn, f: F) -> Result<T>
    where
        F: FnOnce(T) -> T,
    {
        self.alter(txn, f)
    }

    /// Install a validator run against every prospective new value
    ///
    /// Rejection fails the whole transaction with `ValidatorFailure`.
    /// In-process only: other clients of the same ref keep their own
    /// validators.
    pub fn set_validator<F>(&self, validator: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        T: 'static,
    {
        self.resources.hooks.set_validator(Arc::new(move |bytes| {
            let value: T = codec::decode(bytes)?;
            Ok(validator(&value))
        }));
    }

    /// Remove the validator
    pub fn clear_validator(&self) {
        self.resources.hooks.clear_validator();
    }

    /// The installed validator, type-erased over the codec
    pub fn validator(&self) -> Option<Validator> {
        self.resources.hooks.validator()
    }

    /// Register a watch under `key`, fired after every successful commit
    /// that mutated this ref with `(old, new)` values
    ///
    /// Watches run on the client's dispatcher thread, after the commit's
    /// visibility boundary; a panicking watch is logged and discarded.
    pub fn add_watch<F>(&self, key: &str, watch: F)
    where
        F: Fn(Option<&T>, &T) + Send + Sync + 'static,
        T: 'static,
    {
        let path = self.resources.path.clone();
        self.resources.hooks.add_watch(
            key,
            Arc::new(move |old, new| {
                let new_value: T = match codec::decode(new) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(target: "dstm::watch", path = %path, error = %e, "undecodable new value");
                        return;
                    }
                };
                let old_value: Option<T> = old.and_then(|bytes| codec::decode(bytes).ok());
                watch(old_value.as_ref(), &new_value);
            }),
        );
    }

    /// Remove the watch registered under `key`
    pub fn remove_watch(&self, key: &str) -> bool {
        self.resources.hooks.remove_watch(key)
    }

    /// Remove orphaned history entries left by crashed committers
    ///
    /// Takes the ref's write lock; returns the number of entries removed.
    pub fn scrub(&self) -> Result<usize> {
        let deadline = Instant::now() + self.inner.runtime.config().transaction_timeout();
        self.inner.runtime.scrub(&self.resources, deadline)
    }

    /// Tear down the ref's whole subtree
    ///
    /// Destroys state other clients may be using; intended for test
    /// harnesses.
    pub fn destroy(&self) -> Result<()> {
        self.resources.container.destroy_state()?;
        self.inner
            .runtime
            .coordinator()
            .delete_all(&self.resources.path)
    }
}
