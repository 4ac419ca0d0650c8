//! Distributed atoms
//!
//! A [`TAtom<T>`] is a typed handle to a named compare-and-set cell. Atoms
//! hold no transaction state and never participate in transactions; every
//! mutation is a single conditional write against the cell's coordinator
//! data version.
//!
//! `swap` closures may run several times under contention, so they must be
//! pure functions of their input: no I/O, no external mutation, no
//! irreversible effects.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::ClientInner;
use dstm_concurrency::{HookSet, Validator, WatchFire};
use dstm_coordinator::{CreateMode, Stat};
use dstm_core::{codec, Error, Result};

/// Typed handle to a named distributed atom
pub struct TAtom<T> {
    inner: Arc<ClientInner>,
    name: String,
    root: String,
    data_path: String,
    hooks: Arc<HookSet>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TAtom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            name: self.name.clone(),
            root: self.root.clone(),
            data_path: self.data_path.clone(),
            hooks: Arc::clone(&self.hooks),
            _marker: PhantomData,
        }
    }
}

impl<T> TAtom<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(inner: Arc<ClientInner>, name: &str) -> Self {
        let layout = inner.runtime.layout();
        let root = layout.atom_root(name);
        let data_path = layout.atom_data(name);
        let hooks = inner.hooks_for(&data_path);
        Self {
            inner,
            name: name.to_string(),
            root,
            data_path,
            hooks,
            _marker: PhantomData,
        }
    }

    /// The atom's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The atom's data node path
    pub fn path(&self) -> &str {
        &self.data_path
    }

    fn read_cell(&self) -> Result<Option<(Vec<u8>, Stat)>> {
        self.inner.runtime.coordinator().read(&self.data_path)
    }

    fn notify(&self, old: Option<Vec<u8>>, new: Vec<u8>) {
        self.inner.dispatcher.enqueue(WatchFire {
            path: self.data_path.clone(),
            hooks: Arc::clone(&self.hooks),
            old,
            new,
        });
    }

    /// Current value
    ///
    /// # Errors
    /// - `Unbound` if the atom was never seeded
    pub fn read(&self) -> Result<T> {
        match self.read_cell()? {
            Some((bytes, _)) => codec::decode(&bytes),
            None => Err(Error::Unbound {
                path: self.data_path.clone(),
            }),
        }
    }

    /// The cell's data version; counts every successful write
    pub fn version(&self) -> Result<u64> {
        match self.read_cell()? {
            Some((_, stat)) => Ok(stat.version),
            None => Err(Error::Unbound {
                path: self.data_path.clone(),
            }),
        }
    }

    /// Unconditionally set the value
    ///
    /// Runs the validator, then overwrites (creating the cell on first
    /// use). Watches fire with the replaced value as `old`.
    pub fn reset(&self, value: T) -> Result<T> {
        let bytes = codec::encode(&value)?;
        self.hooks.validate(&self.data_path, &bytes)?;
        let coord = self.inner.runtime.coordinator();
        let old = self.read_cell()?.map(|(b, _)| b);
        if old.is_some() {
            coord.write(&self.data_path, &bytes, None)?;
        } else {
            match coord.create(&self.data_path, &bytes, CreateMode::Persistent) {
                Ok(_) => {}
                // Another client seeded the cell between our read and
                // create; fall back to a plain overwrite.
                Err(Error::NodeExists { .. }) => {
                    coord.write(&self.data_path, &bytes, None)?;
                }
                Err(e) => return Err(e),
            }
        }
        self.notify(old, bytes);
        Ok(value)
    }

    /// Set the value to `new` iff the current value equals `expected`
    ///
    /// Returns whether the write happened. The comparison is on decoded
    /// values; the write is conditioned on the cell's data version, so a
    /// concurrent writer between read and write makes this return `false`.
    pub fn compare_and_set(&self, expected: &T, new: T) -> Result<bool>
    where
        T: PartialEq,
    {
        let Some((current_bytes, stat)) = self.read_cell()? else {
            return Err(Error::Unbound {
                path: self.data_path.clone(),
            });
        };
        let current: T = codec::decode(&current_bytes)?;
        if current != *expected {
            return Ok(false);
        }
        let bytes = codec::encode(&new)?;
        self.hooks.validate(&self.data_path, &bytes)?;
        match self
            .inner
            .runtime
            .coordinator()
            .write(&self.data_path, &bytes, Some(stat.version))
        {
            Ok(_) => {
                self.notify(Some(current_bytes), bytes);
                Ok(true)
            }
            Err(e) if e.is_bad_version() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Apply `f` to the current value with an optimistic retry loop
    ///
    /// Re-reads and re-applies on every version mismatch until the
    /// conditional write lands; returns the value that was written.
    pub fn swap<F>(&self, f: F) -> Result<T>
    where
        F: Fn(T) -> T,
    {
        loop {
            let Some((current_bytes, stat)) = self.read_cell()? else {
                return Err(Error::Unbound {
                    path: self.data_path.clone(),
                });
            };
            let current: T = codec::decode(&current_bytes)?;
            let next = f(current);
            let bytes = codec::encode(&next)?;
            self.hooks.validate(&self.data_path, &bytes)?;
            match self
                .inner
                .runtime
                .coordinator()
                .write(&self.data_path, &bytes, Some(stat.version))
            {
                Ok(_) => {
                    self.notify(Some(current_bytes), bytes);
                    return Ok(next);
                }
                Err(e) if e.is_bad_version() => {
                    debug!(target: "dstm::atom", path = %self.data_path, "swap lost the race, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Install a validator run against every prospective value
    pub fn set_validator<F>(&self, validator: F)
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        T: 'static,
    {
        self.hooks.set_validator(Arc::new(move |bytes| {
            let value: T = codec::decode(bytes)?;
            Ok(validator(&value))
        }));
    }

    /// Remove the validator
    pub fn clear_validator(&self) {
        self.hooks.clear_validator();
    }

    /// The installed validator, type-erased over the codec
    pub fn validator(&self) -> Option<Validator> {
        self.hooks.validator()
    }

    /// Register a watch fired after every successful mutation
    pub fn add_watch<F>(&self, key: &str, watch: F)
    where
        F: Fn(Option<&T>, &T) + Send + Sync + 'static,
        T: 'static,
    {
        let path = self.data_path.clone();
        self.hooks.add_watch(
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
        self.hooks.remove_watch(key)
    }

    /// Tear down the atom's subtree; explicit teardown only
    pub fn destroy(&self) -> Result<()> {
        self.inner.runtime.coordinator().delete_all(&self.root)
    }
}
