//! Error types for the distributed STM
//!
//! One unified error enum is used across all crates. We use `thiserror` for
//! automatic `Display` and `Error` trait implementations.
//!
//! Two variants deserve special attention:
//!
//! - [`Error::RetryConflict`] is an *internal* signal. It is raised when a
//!   transaction observes a conflict (stale read-set entry, or a ref created
//!   after the read point) and is consumed by the retry loop in the client
//!   facade. Application code should never see it; escaping the loop is a
//!   bug.
//! - [`Error::BadVersion`] is the conditional-write outcome the atom `swap`
//!   loop recovers from. It surfaces only through direct coordinator use.
//!
//! Everything else unwinds the current operation and is reported to the
//! caller.

use crate::types::TxnId;
use thiserror::Error;

/// Result type alias for STM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the distributed STM
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Ref operation attempted through a transaction handle that is no
    /// longer running (committed, aborted, or mid-retry)
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Internal conflict signal consumed by the transaction retry loop
    #[error("transaction conflict on {path}")]
    RetryConflict {
        /// Ref path the conflict was detected on
        path: String,
    },

    /// A validator rejected a prospective new value; never retried
    #[error("validator rejected new value for {path}")]
    ValidatorFailure {
        /// Ref or atom path whose validator rejected the value
        path: String,
    },

    /// The per-transaction attempt ceiling was exceeded
    #[error("transaction retry budget exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Total attempts made, including the first
        attempts: u32,
    },

    /// The transaction deadline passed before commit
    #[error("transaction deadline exceeded")]
    TransactionTimeout,

    /// A version needed by a reader has been pruned from a ref's history
    #[error("no committed version of {path} at or below {requested} survives retention")]
    StaleRead {
        /// Ref path
        path: String,
        /// The read point the lookup was anchored at
        requested: TxnId,
    },

    /// Conditional write failed: the node's data version moved
    #[error("conditional write failed: expected version {expected}, found {actual}")]
    BadVersion {
        /// Version the writer expected
        expected: u64,
        /// Version actually found on the node
        actual: u64,
    },

    /// The coordinator session expired; all ephemeral state is gone
    #[error("coordinator session lost")]
    SessionLost,

    /// Node creation hit an existing node
    #[error("node already exists: {path}")]
    NodeExists {
        /// Path of the existing node
        path: String,
    },

    /// A node the operation requires does not exist
    #[error("no such node: {path}")]
    NoNode {
        /// Missing path
        path: String,
    },

    /// A ref or atom was dereferenced before any value was committed to it
    #[error("{path} has no committed value")]
    Unbound {
        /// Ref or atom path
        path: String,
    },

    /// Transport-level failure propagated from the coordinator client
    #[error("coordinator error: {0}")]
    Coordinator(String),

    /// Codec failure while encoding or decoding a value
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Lifecycle misuse, e.g. a transition out of a terminal state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Check if this error is the internal conflict signal
    ///
    /// Only these errors are consumed by the transaction retry loop.
    pub fn is_retry(&self) -> bool {
        matches!(self, Error::RetryConflict { .. })
    }

    /// Check if this error is a conditional-write version mismatch
    ///
    /// The atom `swap` loop re-reads and retries on these.
    pub fn is_bad_version(&self) -> bool {
        matches!(self, Error::BadVersion { .. })
    }

    /// Check if this error is a transaction timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TransactionTimeout)
    }

    /// Check if this error reports a lost coordinator session
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Error::SessionLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let e = Error::RetryConflict {
            path: "/stm/refs/a".to_string(),
        };
        assert!(e.is_retry());
        assert!(!e.is_timeout());

        let e = Error::TransactionTimeout;
        assert!(e.is_timeout());
        assert!(!e.is_retry());
    }

    #[test]
    fn test_bad_version_classification() {
        let e = Error::BadVersion {
            expected: 3,
            actual: 4,
        };
        assert!(e.is_bad_version());
        assert!(!e.is_retry());
    }

    #[test]
    fn test_display_includes_path() {
        let e = Error::ValidatorFailure {
            path: "/stm/refs/balance".to_string(),
        };
        assert!(e.to_string().contains("/stm/refs/balance"));
    }

    #[test]
    fn test_serialization_error_from_decode() {
        let bad: std::result::Result<u64, _> = rmp_serde::from_slice(&[0xc1]);
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
