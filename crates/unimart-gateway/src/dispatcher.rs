use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use unimart_types::events::GatewayEvent;

/// Routes gateway events to connected members. Every unimart event is
/// scoped to a negotiation's two participants, so there is no global
/// broadcast — only per-member targeted channels.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// member_id -> (conn_id, sender). One live connection per member;
    /// a newer connection supersedes the older one.
    channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a member's connection. Returns (conn_id, receiver); any
    /// previous channel for the member is replaced.
    pub async fn register(&self, member_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .write()
            .await
            .insert(member_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister, but only if conn_id still owns the channel — a newer
    /// connection may have taken over.
    pub async fn unregister(&self, member_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&member_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&member_id);
            }
        }
    }

    /// Send a targeted event to one member, if connected.
    pub async fn send_to_member(&self, member_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.channels.read().await;
        if let Some((_, tx)) = channels.get(&member_id) {
            let _ = tx.send(event);
        }
    }

    /// Deliver one event to both participants of a negotiation.
    pub async fn send_to_participants(&self, buyer_id: Uuid, seller_id: Uuid, event: GatewayEvent) {
        self.send_to_member(buyer_id, event.clone()).await;
        if seller_id != buyer_id {
            self.send_to_member(seller_id, event).await;
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use unimart_types::models::NegotiationStatus;

    fn update_event() -> GatewayEvent {
        GatewayEvent::NegotiationUpdate {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            status: NegotiationStatus::Accepted,
        }
    }

    #[tokio::test]
    async fn delivers_to_registered_member() {
        let dispatcher = Dispatcher::new();
        let member = Uuid::new_v4();
        let (_conn, mut rx) = dispatcher.register(member).await;

        dispatcher.send_to_member(member, update_event()).await;
        assert!(matches!(
            rx.recv().await,
            Some(GatewayEvent::NegotiationUpdate { .. })
        ));
    }

    #[tokio::test]
    async fn delivers_to_both_participants() {
        let dispatcher = Dispatcher::new();
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let (_c1, mut buyer_rx) = dispatcher.register(buyer).await;
        let (_c2, mut seller_rx) = dispatcher.register(seller).await;

        let event = GatewayEvent::MessageCreate {
            id: Uuid::new_v4(),
            negotiation_id: Uuid::new_v4(),
            sender_id: buyer,
            sender_handle: "bob".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        };
        dispatcher.send_to_participants(buyer, seller, event).await;

        assert!(buyer_rx.recv().await.is_some());
        assert!(seller_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn newer_connection_supersedes_older() {
        let dispatcher = Dispatcher::new();
        let member = Uuid::new_v4();
        let (old_conn, mut old_rx) = dispatcher.register(member).await;
        let (_new_conn, mut new_rx) = dispatcher.register(member).await;

        // The stale connection's cleanup must not tear down the new channel.
        dispatcher.unregister(member, old_conn).await;
        dispatcher.send_to_member(member, update_event()).await;

        assert!(new_rx.recv().await.is_some());
        assert!(old_rx.try_recv().is_err());
    }
}
