use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Condition, NegotiationStatus};

// -- JWT Claims --

/// JWT claims shared between unimart-api (REST middleware) and
/// unimart-gateway (WebSocket authentication). Canonical definition lives
/// here in unimart-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub handle: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub course: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub member_id: Uuid,
    pub handle: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub member_id: Uuid,
    pub handle: String,
    pub token: String,
}

/// The session member's own view: includes the email and admin flags.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub handle: String,
    pub display_name: String,
    pub course: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub is_master: bool,
    pub created_at: DateTime<Utc>,
}

// -- Members --

/// Public profile — no email.
#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
    pub course: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields are optional; `course` / `avatar_url` set to an empty string
/// clear the stored value.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub course: Option<String>,
    pub avatar_url: Option<String>,
}

// -- Listings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateListingRequest {
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub category: String,
    pub condition: Condition,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub seller_handle: String,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub category: String,
    pub condition: Condition,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Negotiations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNegotiationRequest {
    pub listing_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct NegotiationResponse {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub listing_title: String,
    pub buyer_id: Uuid,
    pub buyer_handle: String,
    pub seller_id: Uuid,
    pub seller_handle: String,
    pub status: NegotiationStatus,
    pub created_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub negotiation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_handle: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Admin --

#[derive(Debug, Serialize)]
pub struct AdminMemberResponse {
    pub id: Uuid,
    pub email: String,
    pub handle: String,
    pub display_name: String,
    pub course: Option<String>,
    pub is_admin: bool,
    pub is_master: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGrantRequest {
    pub member_id: Uuid,
    pub is_master: bool,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub member_id: Uuid,
    pub handle: String,
    pub is_master: bool,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
