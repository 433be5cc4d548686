use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::NegotiationStatus;

/// Events sent over the WebSocket gateway. All of them are targeted at the
/// two participants of a negotiation — there is no global broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { member_id: Uuid, handle: String },

    /// A buyer requested one of your listings
    NegotiationCreate {
        id: Uuid,
        listing_id: Uuid,
        listing_title: String,
        buyer_id: Uuid,
        buyer_handle: String,
        seller_id: Uuid,
        created_at: DateTime<Utc>,
    },

    /// The seller settled a pending negotiation
    NegotiationUpdate {
        id: Uuid,
        listing_id: Uuid,
        status: NegotiationStatus,
    },

    /// A new chat message in an accepted negotiation
    MessageCreate {
        id: Uuid,
        negotiation_id: Uuid,
        sender_id: Uuid,
        sender_handle: String,
        content: String,
        created_at: DateTime<Utc>,
    },
}

impl GatewayEvent {
    /// Returns the negotiation id if this event is only delivered to
    /// connections currently watching that negotiation. Events that return
    /// `None` are delivered to the participant unconditionally.
    pub fn watch_scope(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { negotiation_id, .. } => Some(*negotiation_id),
            // Ready and negotiation lifecycle events always reach the member
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Watch one negotiation's message feed. Replaces any previous watch;
    /// the server rejects the watch unless the member is a participant.
    Watch { negotiation_id: Uuid },

    /// Stop watching the current negotiation
    Unwatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_message_events_are_watch_scoped() {
        let nid = Uuid::new_v4();
        let message = GatewayEvent::MessageCreate {
            id: Uuid::new_v4(),
            negotiation_id: nid,
            sender_id: Uuid::new_v4(),
            sender_handle: "ada".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        };
        assert_eq!(message.watch_scope(), Some(nid));

        let update = GatewayEvent::NegotiationUpdate {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            status: NegotiationStatus::Accepted,
        };
        assert_eq!(update.watch_scope(), None);
    }

    #[test]
    fn command_frames_deserialize() {
        let frame = r#"{"type":"Watch","data":{"negotiation_id":"00000000-0000-0000-0000-000000000001"}}"#;
        let cmd: GatewayCommand = serde_json::from_str(frame).unwrap();
        assert!(matches!(cmd, GatewayCommand::Watch { .. }));

        let frame = r#"{"type":"Unwatch"}"#;
        let cmd: GatewayCommand = serde_json::from_str(frame).unwrap();
        assert!(matches!(cmd, GatewayCommand::Unwatch));
    }
}
