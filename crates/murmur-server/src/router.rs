//! Message router: forwards addressed envelopes between online users.
//!
//! The router resolves the recipient in the registry and pushes the
//! envelope, sender stamped, onto the recipient's outbound channel. Nothing
//! is queued for offline users and nothing is retried.

use crate::registry::{ConnectionRegistry, Outbound};
use murmur_core::{Envelope, RouteError};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Routes envelopes by recipient username.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
}

impl MessageRouter {
    /// Create a new router backed by a connection registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Forward `envelope` on behalf of the authenticated `sender`.
    ///
    /// `envelope.from` is always overwritten with `sender`. Returns
    /// [`RouteError::RecipientOffline`] when the recipient has no live
    /// connection; the caller reports that back to the sender.
    pub async fn route(&self, mut envelope: Envelope, sender: &str) -> Result<(), RouteError> {
        envelope.stamp_sender(sender);

        let Some(target) = self.registry.lookup(&envelope.to).await else {
            debug!(from = %sender, to = %envelope.to, "recipient offline");
            return Err(RouteError::RecipientOffline(envelope.to));
        };

        let to = envelope.to.clone();
        let kind = envelope.kind.as_str();
        match target.tx.try_send(Outbound::Deliver(envelope)) {
            Ok(()) => {
                debug!(from = %sender, to = %to, kind, "envelope forwarded");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(from = %sender, to = %to, kind, "recipient buffer full, envelope dropped");
                Err(RouteError::RecipientBusy(to))
            }
            Err(TrySendError::Closed(_)) => {
                debug!(from = %sender, to = %to, "recipient connection closing");
                Err(RouteError::RecipientOffline(to))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::EnvelopeKind;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, MessageRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone());
        (registry, router)
    }

    #[tokio::test]
    async fn forwards_with_sender_stamped() {
        let (registry, router) = setup();
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.admit("bob", bob_tx).await;

        let env = Envelope::new(EnvelopeKind::Encrypted, "bob", json!("X"));
        router.route(env, "alice").await.unwrap();

        match bob_rx.recv().await {
            Some(Outbound::Deliver(delivered)) => {
                assert_eq!(delivered.from.as_deref(), Some("alice"));
                assert_eq!(delivered.to, "bob");
                assert_eq!(delivered.payload(), Some(&json!("X")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn spoofed_sender_is_overwritten() {
        let (registry, router) = setup();
        let (bob_tx, mut bob_rx) = mpsc::channel(8);
        registry.admit("bob", bob_tx).await;

        let mut env = Envelope::new(EnvelopeKind::PublicKey, "bob", json!("key"));
        env.from = Some("mallory".into());
        router.route(env, "alice").await.unwrap();

        let Some(Outbound::Deliver(delivered)) = bob_rx.recv().await else {
            panic!("expected delivery");
        };
        assert_eq!(delivered.from.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn offline_recipient_leaves_registry_untouched() {
        let (registry, router) = setup();
        let (alice_tx, _alice_rx) = mpsc::channel(8);
        registry.admit("alice", alice_tx).await;
        let before = registry.snapshot().await;

        let env = Envelope::new(EnvelopeKind::Encrypted, "bob", json!("Y"));
        let err = router.route(env, "alice").await.unwrap_err();
        assert_eq!(err, RouteError::RecipientOffline("bob".into()));
        assert_eq!(err.to_string(), "bob offline");
        assert_eq!(registry.snapshot().await, before);
    }

    #[tokio::test]
    async fn closed_recipient_is_offline() {
        let (registry, router) = setup();
        let (bob_tx, bob_rx) = mpsc::channel(8);
        registry.admit("bob", bob_tx).await;
        drop(bob_rx);

        let env = Envelope::new(EnvelopeKind::Encrypted, "bob", json!("Z"));
        assert_eq!(
            router.route(env, "alice").await,
            Err(RouteError::RecipientOffline("bob".into()))
        );
    }

    #[tokio::test]
    async fn full_recipient_drops_envelope() {
        let (registry, router) = setup();
        let (bob_tx, _bob_rx) = mpsc::channel(1);
        registry.admit("bob", bob_tx).await;

        let first = Envelope::new(EnvelopeKind::Encrypted, "bob", json!(1));
        let second = Envelope::new(EnvelopeKind::Encrypted, "bob", json!(2));
        router.route(first, "alice").await.unwrap();
        assert_eq!(
            router.route(second, "alice").await,
            Err(RouteError::RecipientBusy("bob".into()))
        );
    }
}
