//! Presence broadcaster: pushes the online-user set to every connection.

use crate::registry::{ConnectionRegistry, Outbound};
use murmur_core::Notice;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Sends a full presence snapshot to all online connections.
///
/// There is no diffing against earlier snapshots; each call is a complete
/// state push, so a peer that races a removal may see one extra or one
/// missing update.
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast the current snapshot. Returns the number of connections
    /// the notice was queued for.
    pub async fn broadcast(&self) -> usize {
        let handles = self.registry.handles().await;

        let mut users: Vec<String> = handles.iter().map(|h| h.username.clone()).collect();
        users.sort();
        let notice = Notice::presence(users);

        let mut delivered = 0;
        for handle in &handles {
            match handle.tx.try_send(Outbound::Notice(notice.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(username = %handle.username, "presence skipped, outbound buffer full");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(username = %handle.username, "presence skipped, connection closing");
                }
            }
        }

        debug!(online = handles.len(), delivered, "presence broadcast");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn presence_users(msg: Option<Outbound>) -> Vec<String> {
        match msg {
            Some(Outbound::Notice(Notice::Presence { users })) => users,
            other => panic!("expected presence notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone());

        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.admit("bob", bob_tx).await;
        registry.admit("alice", alice_tx).await;

        assert_eq!(presence.broadcast().await, 2);
        assert_eq!(presence_users(alice_rx.recv().await), vec!["alice", "bob"]);
        assert_eq!(presence_users(bob_rx.recv().await), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn broadcast_after_removal_matches_snapshot() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone());

        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.admit("alice", alice_tx).await;
        registry.admit("bob", bob_tx).await;
        registry.remove("bob").await;

        assert_eq!(presence.broadcast().await, 1);
        let snapshot: Vec<String> = registry.snapshot().await.into_iter().collect();
        assert_eq!(presence_users(alice_rx.recv().await), snapshot);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_buffer_does_not_fail_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone());

        let (slow_tx, _slow_rx) = mpsc::channel(1);
        slow_tx
            .try_send(Outbound::Notice(Notice::error("filler")))
            .unwrap();
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        registry.admit("slow", slow_tx).await;
        registry.admit("fast", fast_tx).await;

        assert_eq!(presence.broadcast().await, 1);
        assert_eq!(presence_users(fast_rx.recv().await), vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn broadcast_with_nobody_online() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry);
        assert_eq!(presence.broadcast().await, 0);
    }
}
