//! Node-level types shared by all coordinator implementations

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use uuid::Uuid;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives session loss
    Persistent,
    /// Survives session loss; name gets a per-parent sequence suffix
    PersistentSequential,
    /// Deleted when the creating session expires
    Ephemeral,
    /// Ephemeral with a per-parent sequence suffix
    EphemeralSequential,
}

impl CreateMode {
    /// Whether the created name carries a sequence suffix
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }

    /// Whether the node dies with its session
    pub fn is_ephemeral(self) -> bool {
        matches!(
            self,
            CreateMode::Ephemeral | CreateMode::EphemeralSequential
        )
    }
}

/// Node metadata returned by reads and writes
///
/// `version` is the data version: it starts at 0 on create and increments on
/// every successful write. Conditional writes compare against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Data version of the node
    pub version: u64,
}

/// Identity of a coordinator session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh session id
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event delivered to a one-shot watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watched node was deleted
    Deleted {
        /// Path of the deleted node
        path: String,
    },
    /// The watched node's data changed
    DataChanged {
        /// Path of the changed node
        path: String,
    },
    /// The watching session expired; no further events will arrive
    SessionExpired,
}

/// Handle to a registered one-shot watch
///
/// The watch fires at most once; after the event is consumed the handle is
/// spent.
pub struct Watch {
    rx: Receiver<WatchEvent>,
}

impl Watch {
    /// Wrap a receiver; used by coordinator implementations
    pub fn from_receiver(rx: Receiver<WatchEvent>) -> Self {
        Self { rx }
    }

    /// Block until the watch fires or `timeout` elapses
    ///
    /// Returns `None` on timeout. A disconnected sender (the coordinator
    /// went away) is reported as `SessionExpired`.
    pub fn wait(self, timeout: Duration) -> Option<WatchEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(WatchEvent::SessionExpired),
        }
    }

    /// Check for an event without blocking
    pub fn try_take(&self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }
}
