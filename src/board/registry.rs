//! Project-scoped connection registry.
//!
//! Maps a project id to the set of live WebSocket connections viewing it.
//! Sockets opened without a known project are parked in a separate idle set
//! so they still have a queue. Each connection owns the receiving half of an
//! unbounded queue; the registry holds the only sender, so clearing the
//! registry ends every socket loop, parked ones included.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

pub type ConnectionId = u64;

/// Sending side of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// False once the socket task has dropped its receiver.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame. Returns false if the connection has gone away.
    pub fn send(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }
}

type ProjectMap = HashMap<String, HashMap<ConnectionId, ConnectionHandle>>;
type IdleMap = HashMap<ConnectionId, ConnectionHandle>;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    projects: Mutex<ProjectMap>,
    idle: Mutex<IdleMap>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProjectMap> {
        // The map stays structurally valid even if a holder panicked.
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_idle(&self) -> MutexGuard<'_, IdleMap> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a connection id and its outbound queue.
    pub fn open_connection(&self) -> (ConnectionHandle, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle { id, tx }, rx)
    }

    /// Add a connection to a project's set, creating the set if absent.
    pub fn subscribe(&self, project_id: &str, handle: ConnectionHandle) {
        let mut projects = self.lock();
        let id = handle.id;
        let set = projects.entry(project_id.to_string()).or_default();
        set.insert(id, handle);
        debug!(project_id, connection_id = id, subscribers = set.len(), "Connection subscribed");
    }

    /// Remove a connection; an emptied set removes the project entry.
    pub fn unsubscribe(&self, project_id: &str, id: ConnectionId) -> bool {
        let mut projects = self.lock();
        let Some(set) = projects.get_mut(project_id) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            projects.remove(project_id);
        }
        if removed {
            debug!(project_id, connection_id = id, "Connection unsubscribed");
        }
        removed
    }

    /// Subscribe and return a guard that unsubscribes when dropped.
    pub fn attach(self: &Arc<Self>, project_id: &str, handle: ConnectionHandle) -> Subscription {
        let id = handle.id;
        self.subscribe(project_id, handle);
        Subscription {
            registry: Arc::clone(self),
            project_id: project_id.to_string(),
            id,
        }
    }

    /// Hold a connection that belongs to no project. It never receives
    /// events; the returned guard releases it when dropped.
    pub fn park(self: &Arc<Self>, handle: ConnectionHandle) -> Parked {
        let id = handle.id;
        let idle = {
            let mut parked = self.lock_idle();
            parked.insert(id, handle);
            parked.len()
        };
        debug!(connection_id = id, idle, "Connection parked");
        Parked {
            registry: Arc::clone(self),
            id,
        }
    }

    fn unpark(&self, id: ConnectionId) -> bool {
        self.lock_idle().remove(&id).is_some()
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Snapshot of a project's connections, taken under the lock.
    pub fn connections(&self, project_id: &str) -> Vec<ConnectionHandle> {
        self.lock()
            .get(project_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, project_id: &str) -> usize {
        self.lock().get(project_id).map_or(0, HashMap::len)
    }

    pub fn project_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop every registration and parked connection. Socket loops see
    /// their queue close and exit.
    pub fn clear(&self) {
        let connections: usize = {
            let mut projects = self.lock();
            let count = projects.values().map(HashMap::len).sum();
            projects.clear();
            count
        };
        let idle = {
            let mut parked = self.lock_idle();
            let count = parked.len();
            parked.clear();
            count
        };
        debug!(connections, idle, "Connection registry cleared");
    }
}

/// Registration guard held by a socket task for its lifetime.
#[derive(Debug)]
pub struct Subscription {
    registry: Arc<ConnectionRegistry>,
    project_id: String,
    id: ConnectionId,
}

impl Subscription {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.project_id, self.id);
    }
}

/// Guard for a connection held outside any project.
#[derive(Debug)]
pub struct Parked {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Parked {
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Parked {
    fn drop(&mut self) {
        self.registry.unpark(self.id);
    }
}
