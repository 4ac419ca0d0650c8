//! Transaction identifiers and lifecycle states
//!
//! A [`TxnId`] is the sequence number the coordinator assigned to the
//! transaction's history node; two ids are totally ordered by integer order,
//! and that order is the cluster-wide commit order.
//!
//! [`TransactionState`] is stored durably in the transaction's history node
//! (one byte on the wire) so that peers can classify the version tags they
//! find in ref histories.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Cluster-wide monotonic transaction identifier
///
/// Obtained from a sequential coordinator node under `/stm/history`. Also
/// used as the version tag of every ref history entry the transaction
/// commits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TxnId(pub u64);

impl TxnId {
    /// The history node name for this transaction, e.g. `t-0000000042`
    pub fn node_name(&self) -> String {
        format!("t-{:010}", self.0)
    }

    /// Parse a transaction id from a sequential node path or name
    ///
    /// Accepts either the full path (`/stm/history/t-0000000042`) or the
    /// bare node name (`t-0000000042`).
    pub fn from_sequential(path: &str) -> Result<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        match sequential_suffix(name) {
            Some(seq) => Ok(TxnId(seq)),
            None => Err(Error::Coordinator(format!(
                "not a sequential node name: {name}"
            ))),
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Parse the numeric suffix of a sequential node name
///
/// Sequential nodes are named `<prefix>-<seq>` where `<seq>` is a zero-padded
/// decimal counter. Returns `None` when the name has no parseable suffix.
pub fn sequential_suffix(name: &str) -> Option<u64> {
    let (_, digits) = name.rsplit_once('-')?;
    digits.parse::<u64>().ok()
}

/// Durable lifecycle state of a transaction
///
/// State transitions:
/// - `Running` → `Retry` | `Committing` | `Aborted`
/// - `Running` → `Committed` (the read-only shortcut: an empty write set
///   commits without passing through `Committing`)
/// - `Retry` / `Committing` → `Committed` | `Aborted` | `Running`
///
/// Terminal states (no transitions allowed):
/// - `Committed`
/// - `Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Executing the transactional block
    Running,
    /// Commit intent published; version writes may be in flight
    Committing,
    /// All writes are durable and visible
    Committed,
    /// The attempt conflicted and will re-enter with a fresh id
    Retry,
    /// The transaction failed and wrote nothing
    Aborted,
}

impl TransactionState {
    /// One-byte wire encoding stored in the history node
    pub fn encode(self) -> [u8; 1] {
        let b = match self {
            TransactionState::Running => 0,
            TransactionState::Committing => 1,
            TransactionState::Committed => 2,
            TransactionState::Retry => 3,
            TransactionState::Aborted => 4,
        };
        [b]
    }

    /// Decode from the history node payload
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(0) => Ok(TransactionState::Running),
            Some(1) => Ok(TransactionState::Committing),
            Some(2) => Ok(TransactionState::Committed),
            Some(3) => Ok(TransactionState::Retry),
            Some(4) => Ok(TransactionState::Aborted),
            other => Err(Error::Serialization(format!(
                "invalid transaction state byte: {other:?}"
            ))),
        }
    }

    /// Check if this state admits no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }

    /// Check whether a transition to `next` is legal
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        match self {
            Running => matches!(next, Retry | Committing | Committed | Aborted),
            Retry | Committing => matches!(next, Committed | Aborted | Running),
            Committed | Aborted => false,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Running => "RUNNING",
            TransactionState::Committing => "COMMITTING",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Retry => "RETRY",
            TransactionState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}
