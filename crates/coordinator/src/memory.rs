//! In-process coordinator
//!
//! A complete implementation of the [`Coordinator`] trait backed by a single
//! locked node table. It reproduces the semantics the STM depends on:
//!
//! - per-parent sequence counters shared across name prefixes, so lock
//!   waiters queue in true arrival order;
//! - ephemeral nodes bound to a session, deleted (with watches firing) when
//!   the session expires;
//! - one-shot watches that fire immediately when registered against a node
//!   that is already gone.
//!
//! The service object is [`MemoryCoordinator`]; each client obtains an
//! independent [`MemorySession`] from it. [`MemoryCoordinator::expire`]
//! simulates session loss, which is how the session-failure scenarios are
//! tested without a real network.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use tracing::debug;

use crate::node::{CreateMode, SessionId, Stat, Watch, WatchEvent};
use crate::Coordinator;
use dstm_core::{Error, Result};

struct NodeEntry {
    data: Vec<u8>,
    version: u64,
    mode: CreateMode,
    owner: Option<SessionId>,
    delete_watchers: Vec<Sender<WatchEvent>>,
    data_watchers: Vec<Sender<WatchEvent>>,
}

impl NodeEntry {
    fn new(data: Vec<u8>, mode: CreateMode, owner: Option<SessionId>) -> Self {
        Self {
            data,
            version: 0,
            mode,
            owner,
            delete_watchers: Vec::new(),
            data_watchers: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ServiceState {
    nodes: BTreeMap<String, NodeEntry>,
    // Sequence counters survive child deletion, like a real service's
    // per-parent cversion.
    counters: HashMap<String, u64>,
    live_sessions: HashSet<SessionId>,
}

impl ServiceState {
    fn check_session(&self, id: SessionId) -> Result<()> {
        if self.live_sessions.contains(&id) {
            Ok(())
        } else {
            Err(Error::SessionLost)
        }
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn remove_node(&mut self, path: &str) {
        if let Some(mut entry) = self.nodes.remove(path) {
            let event = WatchEvent::Deleted {
                path: path.to_string(),
            };
            for tx in entry.delete_watchers.drain(..) {
                let _ = tx.send(event.clone());
            }
            for tx in entry.data_watchers.drain(..) {
                let _ = tx.send(event.clone());
            }
        }
    }
}

/// Parent path of `path`; the empty string is the virtual root
fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// The in-process coordination service
///
/// Shared by any number of sessions within the process. Cloning is cheap;
/// clones refer to the same node table.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    state: Arc<Mutex<ServiceState>>,
}

impl MemoryCoordinator {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session
    pub fn session(&self) -> MemorySession {
        let id = SessionId::new();
        self.state.lock().live_sessions.insert(id);
        debug!(target: "dstm::coordinator", session = %id, "session opened");
        MemorySession {
            state: Arc::clone(&self.state),
            id,
        }
    }

    /// Expire a session
    ///
    /// All ephemeral nodes owned by the session are deleted (firing their
    /// watches) and every subsequent call through the session's handles
    /// fails with `SessionLost`.
    pub fn expire(&self, id: SessionId) {
        let mut state = self.state.lock();
        state.live_sessions.remove(&id);
        let doomed: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, e)| e.mode.is_ephemeral() && e.owner == Some(id))
            .map(|(k, _)| k.clone())
            .collect();
        for path in doomed {
            state.remove_node(&path);
        }
        debug!(target: "dstm::coordinator", session = %id, "session expired");
    }

    /// Number of nodes currently in the table (diagnostics)
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }
}

/// One client session against a [`MemoryCoordinator`]
#[derive(Clone)]
pub struct MemorySession {
    state: Arc<Mutex<ServiceState>>,
    id: SessionId,
}

impl Coordinator for MemorySession {
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let mut state = self.state.lock();
        state.check_session(self.id)?;

        let parent = parent_of(path).to_string();
        if !parent.is_empty() && !state.nodes.contains_key(&parent) {
            return Err(Error::NoNode { path: parent });
        }

        let actual = if mode.is_sequential() {
            let counter = state.counters.entry(parent).or_insert(0);
            let seq = *counter;
            *counter += 1;
            format!("{path}{seq:010}")
        } else {
            if state.nodes.contains_key(path) {
                return Err(Error::NodeExists {
                    path: path.to_string(),
                });
            }
            path.to_string()
        };

        let owner = mode.is_ephemeral().then_some(self.id);
        state
            .nodes
            .insert(actual.clone(), NodeEntry::new(data.to_vec(), mode, owner));
        Ok(actual)
    }

    fn read(&self, path: &str) -> Result<Option<(Vec<u8>, Stat)>> {
        let state = self.state.lock();
        state.check_session(self.id)?;
        Ok(state.nodes.get(path).map(|e| {
            (
                e.data.clone(),
                Stat {
                    version: e.version,
                },
            )
        }))
    }

    fn write(&self, path: &str, data: &[u8], expected: Option<u64>) -> Result<Stat> {
        let mut state = self.state.lock();
        state.check_session(self.id)?;
        let entry = state.nodes.get_mut(path).ok_or_else(|| Error::NoNode {
            path: path.to_string(),
        })?;
        if let Some(expected) = expected {
            if entry.version != expected {
                return Err(Error::BadVersion {
                    expected,
                    actual: entry.version,
                });
            }
        }
        entry.data = data.to_vec();
        entry.version += 1;
        let stat = Stat {
            version: entry.version,
        };
        let event = WatchEvent::DataChanged {
            path: path.to_string(),
        };
        for tx in entry.data_watchers.drain(..) {
            let _ = tx.send(event.clone());
        }
        Ok(stat)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_session(self.id)?;
        if !state.nodes.contains_key(path) {
            return Err(Error::NoNode {
                path: path.to_string(),
            });
        }
        if state.has_children(path) {
            return Err(Error::InvalidState(format!(
                "cannot delete {path}: node has children"
            )));
        }
        state.remove_node(path);
        Ok(())
    }

    fn delete_all(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_session(self.id)?;
        let prefix = format!("{path}/");
        let mut doomed: Vec<String> = state
            .nodes
            .keys()
            .filter(|k| *k == path || k.starts_with(&prefix))
            .cloned()
            .collect();
        // Leaves first so every removal observes an empty child set.
        doomed.sort_by(|a, b| b.cmp(a));
        for p in doomed {
            state.remove_node(&p);
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state.lock();
        state.check_session(self.id)?;
        Ok(state.nodes.contains_key(path))
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check_session(self.id)?;
        if !state.nodes.contains_key(path) {
            return Err(Error::NoNode {
                path: path.to_string(),
            });
        }
        let prefix = format!("{path}/");
        let names: Vec<String> = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        // BTreeMap iteration already yields sorted names.
        Ok(names)
    }

    fn watch_delete(&self, path: &str) -> Result<Watch> {
        let mut state = self.state.lock();
        state.check_session(self.id)?;
        let (tx, rx) = mpsc::channel();
        match state.nodes.get_mut(path) {
            Some(entry) => entry.delete_watchers.push(tx),
            None => {
                // Already gone: fire before the caller ever waits.
                let _ = tx.send(WatchEvent::Deleted {
                    path: path.to_string(),
                });
            }
        }
        Ok(Watch::from_receiver(rx))
    }

    fn watch_data(&self, path: &str) -> Result<Watch> {
        let mut state = self.state.lock();
        state.check_session(self.id)?;
        let (tx, rx) = mpsc::channel();
        match state.nodes.get_mut(path) {
            Some(entry) => entry.data_watchers.push(tx),
            None => {
                let _ = tx.send(WatchEvent::Deleted {
                    path: path.to_string(),
                });
            }
        }
        Ok(Watch::from_receiver(rx))
    }

    fn session_id(&self) -> SessionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(MemorySession: Send, Sync, Clone);

    fn service_and_session() -> (MemoryCoordinator, MemorySession) {
        let service = MemoryCoordinator::new();
        let session = service.session();
        (service, session)
    }

    // === CRUD Tests ===

    #[test]
    fn test_create_and_read() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"hello", CreateMode::Persistent).unwrap();
        let (data, stat) = c.read("/a").unwrap().unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(stat.version, 0);
    }

    #[test]
    fn test_create_requires_parent() {
        let (_svc, c) = service_and_session();
        let err = c
            .create("/missing/child", b"", CreateMode::Persistent)
            .unwrap_err();
        assert!(matches!(err, Error::NoNode { .. }));
    }

    #[test]
    fn test_create_existing_fails() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"", CreateMode::Persistent).unwrap();
        let err = c.create("/a", b"", CreateMode::Persistent).unwrap_err();
        assert!(matches!(err, Error::NodeExists { .. }));
    }

    #[test]
    fn test_write_bumps_version() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"v0", CreateMode::Persistent).unwrap();
        let stat = c.write("/a", b"v1", None).unwrap();
        assert_eq!(stat.version, 1);
        let (data, stat) = c.read("/a").unwrap().unwrap();
        assert_eq!(data, b"v1");
        assert_eq!(stat.version, 1);
    }

    #[test]
    fn test_conditional_write() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"v0", CreateMode::Persistent).unwrap();
        c.write("/a", b"v1", Some(0)).unwrap();
        let err = c.write("/a", b"v2", Some(0)).unwrap_err();
        assert!(matches!(
            err,
            Error::BadVersion {
                expected: 0,
                actual: 1
            }
        ));
        // Value unchanged by the failed write
        assert_eq!(c.read("/a").unwrap().unwrap().0, b"v1");
    }

    #[test]
    fn test_delete_refuses_children() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"", CreateMode::Persistent).unwrap();
        c.create("/a/b", b"", CreateMode::Persistent).unwrap();
        assert!(c.delete("/a").is_err());
        c.delete("/a/b").unwrap();
        c.delete("/a").unwrap();
        assert!(!c.exists("/a").unwrap());
    }

    #[test]
    fn test_delete_all_removes_subtree() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"", CreateMode::Persistent).unwrap();
        c.create("/a/b", b"", CreateMode::Persistent).unwrap();
        c.create("/a/b/c", b"", CreateMode::Persistent).unwrap();
        c.delete_all("/a").unwrap();
        assert!(!c.exists("/a").unwrap());
        assert!(!c.exists("/a/b/c").unwrap());
        // Missing target is fine
        c.delete_all("/a").unwrap();
    }

    // === Sequential Tests ===

    #[test]
    fn test_sequence_counter_shared_across_prefixes() {
        let (_svc, c) = service_and_session();
        c.create("/lock", b"", CreateMode::Persistent).unwrap();
        let w = c
            .create("/lock/write-", b"", CreateMode::EphemeralSequential)
            .unwrap();
        let r = c
            .create("/lock/read-", b"", CreateMode::EphemeralSequential)
            .unwrap();
        assert_eq!(w, "/lock/write-0000000000");
        assert_eq!(r, "/lock/read-0000000001");
    }

    #[test]
    fn test_sequence_counter_survives_deletion() {
        let (_svc, c) = service_and_session();
        c.create("/q", b"", CreateMode::Persistent).unwrap();
        let first = c
            .create("/q/n-", b"", CreateMode::PersistentSequential)
            .unwrap();
        c.delete(&first).unwrap();
        let second = c
            .create("/q/n-", b"", CreateMode::PersistentSequential)
            .unwrap();
        assert_eq!(second, "/q/n-0000000001");
    }

    #[test]
    fn test_children_sorted() {
        let (_svc, c) = service_and_session();
        c.create("/p", b"", CreateMode::Persistent).unwrap();
        c.create("/p/b", b"", CreateMode::Persistent).unwrap();
        c.create("/p/a", b"", CreateMode::Persistent).unwrap();
        c.create("/p/a/nested", b"", CreateMode::Persistent).unwrap();
        assert_eq!(c.children("/p").unwrap(), vec!["a", "b"]);
    }

    // === Watch Tests ===

    #[test]
    fn test_watch_delete_fires() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"", CreateMode::Persistent).unwrap();
        let watch = c.watch_delete("/a").unwrap();
        c.delete("/a").unwrap();
        assert_eq!(
            watch.wait(Duration::from_millis(100)),
            Some(WatchEvent::Deleted {
                path: "/a".to_string()
            })
        );
    }

    #[test]
    fn test_watch_delete_missing_fires_immediately() {
        let (_svc, c) = service_and_session();
        let watch = c.watch_delete("/never").unwrap();
        assert!(watch.try_take().is_some());
    }

    #[test]
    fn test_watch_data_fires_on_write() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"", CreateMode::Persistent).unwrap();
        let watch = c.watch_data("/a").unwrap();
        c.write("/a", b"new", None).unwrap();
        assert_eq!(
            watch.wait(Duration::from_millis(100)),
            Some(WatchEvent::DataChanged {
                path: "/a".to_string()
            })
        );
    }

    #[test]
    fn test_watch_is_one_shot() {
        let (_svc, c) = service_and_session();
        c.create("/a", b"", CreateMode::Persistent).unwrap();
        let watch = c.watch_data("/a").unwrap();
        c.write("/a", b"x", None).unwrap();
        assert!(watch.try_take().is_some());
        // A second write reaches no one; a fresh watch is required.
        c.write("/a", b"y", None).unwrap();
        assert!(watch.try_take().is_none());
    }

    // === Session Tests ===

    #[test]
    fn test_expire_deletes_ephemerals_and_fires_watches() {
        let (svc, a) = service_and_session();
        let b = svc.session();
        a.create("/locks", b"", CreateMode::Persistent).unwrap();
        let node = a
            .create("/locks/write-", b"", CreateMode::EphemeralSequential)
            .unwrap();
        let watch = b.watch_delete(&node).unwrap();

        svc.expire(a.session_id());

        assert!(matches!(
            watch.wait(Duration::from_millis(100)),
            Some(WatchEvent::Deleted { .. })
        ));
        assert!(!b.exists(&node).unwrap());
    }

    #[test]
    fn test_expired_session_fails_everything() {
        let (svc, a) = service_and_session();
        svc.expire(a.session_id());
        assert!(matches!(
            a.create("/a", b"", CreateMode::Persistent),
            Err(Error::SessionLost)
        ));
        assert!(matches!(a.read("/a"), Err(Error::SessionLost)));
        assert!(matches!(a.exists("/a"), Err(Error::SessionLost)));
    }

    #[test]
    fn test_persistent_nodes_survive_expiry() {
        let (svc, a) = service_and_session();
        let b = svc.session();
        a.create("/data", b"keep", CreateMode::Persistent).unwrap();
        svc.expire(a.session_id());
        assert_eq!(b.read("/data").unwrap().unwrap().0, b"keep");
    }
}
