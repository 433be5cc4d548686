use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A marketplace member. Created on registration; the handle is derived
/// from the local part of the campus email and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub handle: String,
    pub display_name: String,
    pub course: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Physical condition of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::LikeNew => "like_new",
            Condition::Good => "good",
            Condition::Fair => "fair",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Condition::New),
            "like_new" => Some(Condition::LikeNew),
            "good" => Some(Condition::Good),
            "fair" => Some(Condition::Fair),
            _ => None,
        }
    }
}

/// An item offered for sale. Owned by exactly one member; prices are
/// integer cents so money stays exact in SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub category: String,
    pub condition: Condition,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a buy request.
///
/// `Completed` is representable but reserved: no transition produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Pending => "pending",
            NegotiationStatus::Accepted => "accepted",
            NegotiationStatus::Rejected => "rejected",
            NegotiationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NegotiationStatus::Pending),
            "accepted" => Some(NegotiationStatus::Accepted),
            "rejected" => Some(NegotiationStatus::Rejected),
            "completed" => Some(NegotiationStatus::Completed),
            _ => None,
        }
    }

    /// The only legal transitions are pending -> accepted and
    /// pending -> rejected. Nothing re-opens a settled negotiation.
    pub fn may_become(self, next: NegotiationStatus) -> bool {
        matches!(
            (self, next),
            (NegotiationStatus::Pending, NegotiationStatus::Accepted)
                | (NegotiationStatus::Pending, NegotiationStatus::Rejected)
        )
    }

    /// Messages may only flow while the seller has accepted the request.
    pub fn allows_messages(self) -> bool {
        self == NegotiationStatus::Accepted
    }
}

/// A buy request linking a buyer and a seller over one listing.
/// The seller id is denormalized from the listing at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub status: NegotiationStatus,
    pub created_at: DateTime<Utc>,
}

impl Negotiation {
    pub fn is_participant(&self, member_id: Uuid) -> bool {
        self.buyer_id == member_id || self.seller_id == member_id
    }
}

/// A chat message inside an accepted negotiation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub negotiation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Administrative authority over the marketplace. `is_master` confers
/// authority over other grants; the last master grant can never be removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminGrant {
    pub member_id: Uuid,
    pub is_master: bool,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_transitions_exist() {
        use NegotiationStatus::*;

        assert!(Pending.may_become(Accepted));
        assert!(Pending.may_become(Rejected));

        for from in [Accepted, Rejected, Completed] {
            for to in [Pending, Accepted, Rejected, Completed] {
                assert!(!from.may_become(to), "{from:?} -> {to:?} must be illegal");
            }
        }
        assert!(!Pending.may_become(Pending));
        assert!(!Pending.may_become(Completed));
    }

    #[test]
    fn messaging_requires_accepted() {
        use NegotiationStatus::*;
        assert!(Accepted.allows_messages());
        assert!(!Pending.allows_messages());
        assert!(!Rejected.allows_messages());
        assert!(!Completed.allows_messages());
    }

    #[test]
    fn status_strings_roundtrip() {
        use NegotiationStatus::*;
        for status in [Pending, Accepted, Rejected, Completed] {
            assert_eq!(NegotiationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NegotiationStatus::parse("open"), None);
    }

    #[test]
    fn condition_strings_roundtrip() {
        use Condition::*;
        for condition in [New, LikeNew, Good, Fair] {
            assert_eq!(Condition::parse(condition.as_str()), Some(condition));
        }
        assert_eq!(Condition::parse("mint"), None);
    }
}
