//! Coordination-service seam
//!
//! The STM never talks to a concrete coordination service directly; it goes
//! through the [`Coordinator`] trait, which models the minimal operation set
//! the protocol needs from an ordered, linearizable hierarchical store:
//! node CRUD with persistent/ephemeral and sequential create modes,
//! conditional writes against a per-node data version, one-shot watches, and
//! session identity.
//!
//! [`MemoryCoordinator`] is a complete in-process implementation with real
//! session semantics (ephemeral nodes die with their session, watches fire
//! on expiry). It backs every test in the workspace and is also what the
//! node-local deployments use. A production deployment implements
//! [`Coordinator`] against a real coordination service; nothing above the
//! trait changes.

pub mod memory;
pub mod node;

pub use memory::{MemoryCoordinator, MemorySession};
pub use node::{CreateMode, SessionId, Stat, Watch, WatchEvent};

use dstm_core::Result;

/// Client-side handle to the coordination service
///
/// All methods are safe to call concurrently from multiple threads
/// (implementations must be `Send + Sync`). Every call can fail with
/// `SessionLost` once the session behind the handle has expired.
pub trait Coordinator: Send + Sync {
    /// Create a node
    ///
    /// For sequential modes, `path` is the creation prefix and the returned
    /// path carries the assigned zero-padded sequence suffix; sequence
    /// numbers increase monotonically per parent, across all prefixes.
    /// For non-sequential modes the returned path equals `path`.
    ///
    /// # Errors
    /// - `NoNode` if the parent does not exist
    /// - `NodeExists` for a non-sequential create of an existing path
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// Read a node's data and stat; `None` if the node does not exist
    fn read(&self, path: &str) -> Result<Option<(Vec<u8>, Stat)>>;

    /// Overwrite a node's data
    ///
    /// With `expected = Some(v)` the write only succeeds when the node's
    /// current data version equals `v` (`BadVersion` otherwise). The data
    /// version increments on every successful write.
    ///
    /// # Errors
    /// - `NoNode` if the node does not exist
    /// - `BadVersion` on a conditional-write mismatch
    fn write(&self, path: &str, data: &[u8], expected: Option<u64>) -> Result<Stat>;

    /// Delete a node
    ///
    /// # Errors
    /// - `NoNode` if the node does not exist
    /// - `InvalidState` if the node still has children
    fn delete(&self, path: &str) -> Result<()>;

    /// Delete a node and its whole subtree; missing nodes are not an error
    fn delete_all(&self, path: &str) -> Result<()>;

    /// Check whether a node exists
    fn exists(&self, path: &str) -> Result<bool>;

    /// Names of a node's direct children, sorted
    ///
    /// # Errors
    /// - `NoNode` if the node does not exist
    fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Register a one-shot watch that fires when `path` is deleted
    ///
    /// If the node does not exist at registration time the watch fires
    /// immediately.
    fn watch_delete(&self, path: &str) -> Result<Watch>;

    /// Register a one-shot watch that fires when `path`'s data changes or
    /// the node is deleted
    fn watch_data(&self, path: &str) -> Result<Watch>;

    /// The session this handle is bound to
    fn session_id(&self) -> SessionId;
}
