//! Coordinator-backed state container
//!
//! Each version is a sequential child of `<ref>/history`; the child payload
//! is a [`VersionRecord`] carrying the committing transaction's id plus the
//! encoded user value. Appends happen under the ref's write lock, so child
//! sequence order and transaction-id order agree.
//!
//! Pruning is crash-safe in the direction that matters: the watermark in the
//! history node's own data is advanced *before* children are deleted, so a
//! reader can never silently miss a discarded version; it sees the
//! watermark and fails with `StaleRead`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::container::StateContainer;
use dstm_coordinator::{Coordinator, CreateMode};
use dstm_core::paths::{self, VERSION_PREFIX};
use dstm_core::{codec, Error, Result, TxnId};

/// Wire payload of one history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Id of the committing transaction (the version tag)
    pub txn_id: TxnId,
    /// Encoded user value
    pub data: Vec<u8>,
}

/// Pruning watermark stored in the history node's own data
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PruneMark {
    through: TxnId,
}

/// A ref's version chain stored in the coordinator
pub struct CoordinatorContainer {
    coord: Arc<dyn Coordinator>,
    history_path: String,
    retention: usize,
}

impl CoordinatorContainer {
    /// Build a container over `<ref_root>/history`
    pub fn new(coord: Arc<dyn Coordinator>, ref_root: &str, retention: usize) -> Self {
        Self {
            coord,
            history_path: paths::ref_history(ref_root),
            retention: retention.max(1),
        }
    }

    /// All retained entries as `(version tag, child name)`, ascending by tag
    fn entries(&self) -> Result<Vec<(TxnId, String)>> {
        let mut out = Vec::new();
        for name in self.coord.children(&self.history_path)? {
            let child = format!("{}/{}", self.history_path, name);
            // A child may vanish between listing and read if another client
            // prunes concurrently; skip it.
            if let Some((data, _)) = self.coord.read(&child)? {
                let record: VersionRecord = codec::decode(&data)?;
                out.push((record.txn_id, name));
            }
        }
        out.sort_by_key(|(id, _)| *id);
        Ok(out)
    }

    fn prune(&self, entries: &[(TxnId, String)]) -> Result<()> {
        if entries.len() <= self.retention {
            return Ok(());
        }
        let excess = &entries[..entries.len() - self.retention];
        let through = excess.iter().map(|(id, _)| *id).max().expect("non-empty");

        // Watermark first: a crash between the two steps leaves extra
        // children behind, never a silent gap.
        let mark = codec::encode(&PruneMark { through })?;
        self.coord.write(&self.history_path, &mark, None)?;
        for (id, name) in excess {
            let _ = self
                .coord
                .delete(&format!("{}/{}", self.history_path, name));
            debug!(target: "dstm::storage", path = %self.history_path, version = %id, "pruned version");
        }
        Ok(())
    }
}

impl StateContainer for CoordinatorContainer {
    fn init_state(&self) -> Result<()> {
        match self
            .coord
            .create(&self.history_path, &[], CreateMode::Persistent)
        {
            Ok(_) | Err(Error::NodeExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn get_state(&self, version: TxnId) -> Result<Vec<u8>> {
        for name in self.coord.children(&self.history_path)? {
            let child = format!("{}/{}", self.history_path, name);
            if let Some((data, _)) = self.coord.read(&child)? {
                let record: VersionRecord = codec::decode(&data)?;
                if record.txn_id == version {
                    return Ok(record.data);
                }
            }
        }
        Err(Error::StaleRead {
            path: self.history_path.clone(),
            requested: version,
        })
    }

    fn set_state(&self, version: TxnId, data: &[u8]) -> Result<()> {
        let mut entries = self.entries()?;
        if entries.iter().any(|(id, _)| *id == version) {
            return Ok(());
        }
        let record = codec::encode(&VersionRecord {
            txn_id: version,
            data: data.to_vec(),
        })?;
        let created = self.coord.create(
            &format!("{}/{}", self.history_path, VERSION_PREFIX),
            &record,
            CreateMode::PersistentSequential,
        )?;
        let name = created
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        entries.push((version, name));
        entries.sort_by_key(|(id, _)| *id);
        self.prune(&entries)
    }

    fn versions(&self) -> Result<Vec<TxnId>> {
        Ok(self.entries()?.into_iter().map(|(id, _)| id).collect())
    }

    fn pruned_through(&self) -> Result<Option<TxnId>> {
        match self.coord.read(&self.history_path)? {
            Some((data, _)) if !data.is_empty() => {
                let mark: PruneMark = codec::decode(&data)?;
                Ok(Some(mark.through))
            }
            Some(_) => Ok(None),
            None => Err(Error::NoNode {
                path: self.history_path.clone(),
            }),
        }
    }

    fn remove_state(&self, version: TxnId) -> Result<()> {
        for (id, name) in self.entries()? {
            if id == version {
                self.coord
                    .delete(&format!("{}/{}", self.history_path, name))?;
                return Ok(());
            }
        }
        Ok(())
    }

    fn destroy_state(&self) -> Result<()> {
        self.coord.delete_all(&self.history_path)
    }
}
