//! Node-local state container
//!
//! Version chains live in a process-wide registry keyed by container path,
//! so every `LocalContainer` opened for the same ref within one process
//! shares one chain. Nothing crosses the process boundary: this backend is
//! for benchmarking and same-process tests, not distribution. Locks and
//! transaction states still go through the coordinator.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::container::StateContainer;
use dstm_core::{Error, Result, TxnId};

static REGISTRY: Lazy<DashMap<String, Arc<LocalCell>>> = Lazy::new(DashMap::new);

#[derive(Default)]
struct LocalCell {
    inner: RwLock<LocalState>,
}

#[derive(Default)]
struct LocalState {
    versions: BTreeMap<TxnId, Vec<u8>>,
    pruned_through: Option<TxnId>,
}

/// A ref's version chain held in process memory
pub struct LocalContainer {
    path: String,
    cell: Arc<LocalCell>,
    retention: usize,
}

impl LocalContainer {
    /// Open (or attach to) the chain registered under `ref_root`
    pub fn open(ref_root: &str, retention: usize) -> Self {
        let cell = REGISTRY
            .entry(ref_root.to_string())
            .or_default()
            .clone();
        Self {
            path: ref_root.to_string(),
            cell,
            retention: retention.max(1),
        }
    }
}

impl StateContainer for LocalContainer {
    fn init_state(&self) -> Result<()> {
        Ok(())
    }

    fn get_state(&self, version: TxnId) -> Result<Vec<u8>> {
        let state = self.cell.inner.read();
        state
            .versions
            .get(&version)
            .cloned()
            .ok_or_else(|| Error::StaleRead {
                path: self.path.clone(),
                requested: version,
            })
    }

    fn set_state(&self, version: TxnId, data: &[u8]) -> Result<()> {
        let mut state = self.cell.inner.write();
        state.versions.entry(version).or_insert_with(|| data.to_vec());
        while state.versions.len() > self.retention {
            let oldest = *state.versions.keys().next().expect("non-empty");
            state.versions.remove(&oldest);
            state.pruned_through = Some(state.pruned_through.map_or(oldest, |w| w.max(oldest)));
        }
        Ok(())
    }

    fn versions(&self) -> Result<Vec<TxnId>> {
        Ok(self.cell.inner.read().versions.keys().copied().collect())
    }

    fn pruned_through(&self) -> Result<Option<TxnId>> {
        Ok(self.cell.inner.read().pruned_through)
    }

    fn remove_state(&self, version: TxnId) -> Result<()> {
        self.cell.inner.write().versions.remove(&version);
        Ok(())
    }

    fn destroy_state(&self) -> Result<()> {
        REGISTRY.remove(&self.path);
        let mut state = self.cell.inner.write();
        state.versions.clear();
        state.pruned_through = None;
        Ok(())
    }
}
