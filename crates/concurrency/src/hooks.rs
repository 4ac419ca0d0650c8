//! Validator and watch registry
//!
//! Each ref or atom carries one [`HookSet`]: an optional validator plus a
//! keyed map of watch callbacks. Hooks are in-process state, never stored
//! in the coordinator, and the set is guarded by a per-object monitor so
//! registration from one thread is visible to committers on another.
//!
//! The callbacks here are type-erased over the codec: the facade wraps the
//! user's typed closures before registering them. Validators run inside the
//! commit path (their verdict decides the transaction); watches run on the
//! dispatcher thread after commit and can never affect it.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use dstm_core::{Error, Result};

/// Type-erased validator: `Ok(true)` accepts, `Ok(false)` rejects,
/// `Err` propagates (e.g. the candidate bytes failed to decode)
pub type Validator = Arc<dyn Fn(&[u8]) -> Result<bool> + Send + Sync>;

/// Type-erased watch callback, invoked with `(old, new)` encoded values
pub type WatchFn = Arc<dyn Fn(Option<&[u8]>, &[u8]) + Send + Sync>;

#[derive(Default)]
struct HookInner {
    validator: Option<Validator>,
    watches: BTreeMap<String, WatchFn>,
}

/// The hook registry of a single ref or atom
#[derive(Default)]
pub struct HookSet {
    inner: Mutex<HookInner>,
}

impl HookSet {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the validator
    pub fn set_validator(&self, validator: Validator) {
        self.inner.lock().validator = Some(validator);
    }

    /// Remove the validator
    pub fn clear_validator(&self) {
        self.inner.lock().validator = None;
    }

    /// The current validator, if any
    pub fn validator(&self) -> Option<Validator> {
        self.inner.lock().validator.clone()
    }

    /// Run the validator against a prospective new value
    ///
    /// # Errors
    /// - `ValidatorFailure` if the validator rejects the value
    /// - any error the validator itself raises
    pub fn validate(&self, path: &str, candidate: &[u8]) -> Result<()> {
        // Snapshot under the monitor, run outside it: validators are user
        // code and must not hold the registry lock.
        let validator = self.inner.lock().validator.clone();
        match validator {
            None => Ok(()),
            Some(v) => {
                if v(candidate)? {
                    Ok(())
                } else {
                    Err(Error::ValidatorFailure {
                        path: path.to_string(),
                    })
                }
            }
        }
    }

    /// Register a watch under `key`, replacing any previous watch with the
    /// same key
    pub fn add_watch(&self, key: impl Into<String>, watch: WatchFn) {
        self.inner.lock().watches.insert(key.into(), watch);
    }

    /// Remove the watch registered under `key`; returns whether one existed
    pub fn remove_watch(&self, key: &str) -> bool {
        self.inner.lock().watches.remove(key).is_some()
    }

    /// Whether any watches are registered
    pub fn has_watches(&self) -> bool {
        !self.inner.lock().watches.is_empty()
    }

    /// Snapshot of the registered watch callbacks, in key order
    pub fn watchers(&self) -> Vec<WatchFn> {
        self.inner.lock().watches.values().cloned().collect()
    }
}
