//! The `StateContainer` trait
//!
//! Contract, for every implementation:
//!
//! - `set_state(V, bytes)` makes `get_state(V)` return `bytes` once the call
//!   returns; writing the same version twice is a no-op (idempotent per
//!   version id).
//! - `versions()` is ascending and agrees with transaction-id order.
//! - After each append the container prunes the chain to its configured
//!   retention (oldest first) and advances a durable watermark;
//!   `pruned_through()` reports the highest discarded id. Reading a
//!   discarded version fails with `StaleRead`.

use dstm_core::{Result, TxnId};

/// Versioned durable backing store for a single ref's value history
///
/// Thread safety: all methods must be safe to call concurrently
/// (implementations are `Send + Sync`); external serialization of writers is
/// the lock layer's responsibility.
pub trait StateContainer: Send + Sync {
    /// Materialize the container's durable state; idempotent
    fn init_state(&self) -> Result<()>;

    /// Read the encoded value stored at exactly `version`
    ///
    /// # Errors
    /// - `StaleRead` if the version was pruned or never written
    fn get_state(&self, version: TxnId) -> Result<Vec<u8>>;

    /// Append (or idempotently re-append) the value for `version`, then
    /// prune to retention
    fn set_state(&self, version: TxnId, data: &[u8]) -> Result<()>;

    /// All retained version tags, ascending
    fn versions(&self) -> Result<Vec<TxnId>>;

    /// The highest version id discarded by pruning, if any
    fn pruned_through(&self) -> Result<Option<TxnId>>;

    /// Remove a version written by a transaction that never committed
    ///
    /// Used by the lazy cleanup pass; removing a version that is not present
    /// is a no-op. Does not advance the pruning watermark.
    fn remove_state(&self, version: TxnId) -> Result<()>;

    /// Tear down the container's durable state entirely
    fn destroy_state(&self) -> Result<()>;
}
