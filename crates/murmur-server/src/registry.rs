//! Connection registry: the single source of truth for who is online.
//!
//! Maps a username to the one live connection bound to it. Every mutation
//! goes through the registry's write lock, so admission and removal
//! triggered by independent connection tasks never interleave.

use murmur_core::{Envelope, Notice};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info};

/// A message pushed to a connection's task for delivery over its transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Forwarded client envelope (sender already stamped).
    Deliver(Envelope),
    /// Server notice (presence, status).
    Notice(Notice),
}

/// Sink for one live connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    /// Registry-assigned connection ID, unique for the process lifetime.
    pub id: u64,
    /// Username bound at admission.
    pub username: String,
    /// Channel into the connection's task.
    pub tx: mpsc::Sender<Outbound>,
    /// When the connection was admitted.
    pub admitted_at: Instant,
    /// Fired when a newer admission for the same username replaces this one.
    superseded: Arc<Notify>,
}

impl ConnHandle {
    /// Ask the connection's task to close because it was replaced. The
    /// signal is latched, so it is not lost if the task is busy.
    pub fn supersede(&self) {
        self.superseded.notify_one();
    }

    /// Resolves once [`ConnHandle::supersede`] has been called.
    pub async fn superseded(&self) {
        self.superseded.notified().await;
    }
}

/// Outcome of [`ConnectionRegistry::admit`].
#[derive(Debug)]
pub struct Admission {
    /// Handle of the newly admitted connection.
    pub handle: ConnHandle,
    /// Previous connection for the same username, no longer registered.
    pub evicted: Option<ConnHandle>,
}

/// Registry of live connections keyed by username.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnHandle>>,
    /// Monotonic connection ID counter.
    next_conn_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Register a live connection for `username`.
    ///
    /// An existing entry for the same username is replaced and handed back in
    /// [`Admission::evicted`]; the registry does not close it.
    pub async fn admit(&self, username: &str, tx: mpsc::Sender<Outbound>) -> Admission {
        let handle = ConnHandle {
            id: self.next_conn_id.fetch_add(1, Ordering::Relaxed),
            username: username.to_string(),
            tx,
            admitted_at: Instant::now(),
            superseded: Arc::new(Notify::new()),
        };

        let evicted = {
            let mut connections = self.connections.write().await;
            connections.insert(username.to_string(), handle.clone())
        };

        match &evicted {
            Some(old) => info!(
                username = %username,
                conn_id = handle.id,
                replaced = old.id,
                "connection admitted, previous connection evicted"
            ),
            None => info!(username = %username, conn_id = handle.id, "connection admitted"),
        }

        Admission { handle, evicted }
    }

    /// Remove the entry for `username`. No-op if absent.
    pub async fn remove(&self, username: &str) -> Option<ConnHandle> {
        let removed = self.connections.write().await.remove(username);
        if let Some(ref handle) = removed {
            debug!(username = %username, conn_id = handle.id, "connection removed");
        }
        removed
    }

    /// Remove the entry for `username` only if it still belongs to `conn_id`.
    ///
    /// Returns `true` if an entry was removed. A connection that was evicted
    /// by a newer admission must not remove its replacement on close.
    pub async fn remove_connection(&self, username: &str, conn_id: u64) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(username) {
            Some(current) if current.id == conn_id => {
                connections.remove(username);
                debug!(username = %username, conn_id, "connection removed");
                true
            }
            _ => false,
        }
    }

    /// Look up the live connection for `username`.
    pub async fn lookup(&self, username: &str) -> Option<ConnHandle> {
        self.connections.read().await.get(username).cloned()
    }

    /// The set of online usernames.
    pub async fn snapshot(&self) -> BTreeSet<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// All live handles, read under a single lock acquisition.
    pub async fn handles(&self) -> Vec<ConnHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Number of online users.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
