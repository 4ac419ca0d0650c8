//! Coordinator subtree layout
//!
//! All path construction goes through [`StmLayout`] so the shape of the
//! subtree is written down in exactly one place:
//!
//! ```text
//! <root>
//!   /history            transaction state nodes, sequential "t-<seq>"
//!   /refs/<name>
//!     /history          version chain, sequential "v-<seq>"
//!     /txn              commit intent markers
//!     /lock             read/write lock directory
//!   /atoms/<name>/data  CAS cell
//! ```

use crate::error::{Error, Result};
use crate::types::TxnId;

/// Sequential prefix for transaction history nodes
pub const TXN_PREFIX: &str = "t-";
/// Sequential prefix for ref version nodes
pub const VERSION_PREFIX: &str = "v-";

/// Path construction for one STM subtree
#[derive(Debug, Clone)]
pub struct StmLayout {
    root: String,
}

impl StmLayout {
    /// Create a layout rooted at `root` (trailing slashes are trimmed)
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    /// The subtree root path
    pub fn root(&self) -> &str {
        &self.root
    }

    /// `<root>/history`
    pub fn history(&self) -> String {
        format!("{}/history", self.root)
    }

    /// The creation prefix for a new transaction node, `<root>/history/t-`
    pub fn txn_prefix(&self) -> String {
        format!("{}/history/{}", self.root, TXN_PREFIX)
    }

    /// The state node of a transaction, `<root>/history/t-<seq>`
    pub fn txn_node(&self, id: TxnId) -> String {
        format!("{}/history/{}", self.root, id.node_name())
    }

    /// `<root>/refs`
    pub fn refs(&self) -> String {
        format!("{}/refs", self.root)
    }

    /// The subtree root of a named ref
    pub fn ref_root(&self, name: &str) -> String {
        format!("{}/refs/{}", self.root, name)
    }

    /// `<root>/atoms`
    pub fn atoms(&self) -> String {
        format!("{}/atoms", self.root)
    }

    /// The subtree root of a named atom
    pub fn atom_root(&self, name: &str) -> String {
        format!("{}/atoms/{}", self.root, name)
    }

    /// The data node of a named atom
    pub fn atom_data(&self, name: &str) -> String {
        format!("{}/atoms/{}/data", self.root, name)
    }
}

/// The version-chain directory under a ref root
pub fn ref_history(ref_root: &str) -> String {
    format!("{ref_root}/history")
}

/// The commit-intent directory under a ref root
pub fn ref_txn(ref_root: &str) -> String {
    format!("{ref_root}/txn")
}

/// The lock directory under a ref root
pub fn ref_lock(ref_root: &str) -> String {
    format!("{ref_root}/lock")
}

/// Validate a ref or atom name
///
/// Names become single path segments, so they may not be empty or contain
/// `/`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidState(format!(
            "invalid ref/atom name: {name:?}"
        )));
    }
    Ok(())
}
