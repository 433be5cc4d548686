use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use unimart_db::StoreError;
use unimart_db::models::{NegotiationDetailRow, parse_timestamp};
use unimart_db::queries::NegotiationRole;
use unimart_types::api::{Claims, CreateNegotiationRequest, NegotiationResponse};
use unimart_types::events::GatewayEvent;
use unimart_types::models::NegotiationStatus;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::parse_uuid;

#[derive(Debug, Deserialize)]
pub struct NegotiationQuery {
    /// "buying" or "selling"; omitted means both sides.
    pub role: Option<String>,
}

pub(crate) fn negotiation_response(row: NegotiationDetailRow) -> NegotiationResponse {
    let status = NegotiationStatus::parse(&row.status).unwrap_or_else(|| {
        warn!("Corrupt status '{}' on negotiation '{}'", row.status, row.id);
        NegotiationStatus::Pending
    });
    NegotiationResponse {
        id: parse_uuid(&row.id, "negotiation id"),
        listing_id: parse_uuid(&row.listing_id, "listing id"),
        listing_title: row.listing_title,
        buyer_id: parse_uuid(&row.buyer_id, "buyer id"),
        buyer_handle: row.buyer_handle,
        seller_id: parse_uuid(&row.seller_id, "seller id"),
        seller_handle: row.seller_handle,
        status,
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Request to buy. Returns 201 with a fresh negotiation, or 200 with the
/// existing active one for this (listing, buyer) pair.
pub async fn create_negotiation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateNegotiationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let negotiation_id = Uuid::new_v4();

    let db = state.db.clone();
    let id = negotiation_id.to_string();
    let listing_id = req.listing_id.to_string();
    let buyer_id = claims.sub.to_string();
    let (detail, created) =
        run_blocking(move || db.create_negotiation(&id, &listing_id, &buyer_id)).await?;

    let response = negotiation_response(detail);

    if created {
        state
            .dispatcher
            .send_to_participants(
                response.buyer_id,
                response.seller_id,
                GatewayEvent::NegotiationCreate {
                    id: response.id,
                    listing_id: response.listing_id,
                    listing_title: response.listing_title.clone(),
                    buyer_id: response.buyer_id,
                    buyer_handle: response.buyer_handle.clone(),
                    seller_id: response.seller_id,
                    created_at: response.created_at,
                },
            )
            .await;
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

pub async fn accept_negotiation(
    state: State<AppState>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    settle(state, path, claims, NegotiationStatus::Accepted).await
}

pub async fn reject_negotiation(
    state: State<AppState>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    settle(state, path, claims, NegotiationStatus::Rejected).await
}

async fn settle(
    State(state): State<AppState>,
    Path(negotiation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    next: NegotiationStatus,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = negotiation_id.to_string();
    let actor = claims.sub.to_string();
    let detail = run_blocking(move || {
        db.settle_negotiation(&id, &actor, next)?;
        db.get_negotiation_detail(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("Negotiation not found: {id}")))
    })
    .await?;

    let response = negotiation_response(detail);

    state
        .dispatcher
        .send_to_participants(
            response.buyer_id,
            response.seller_id,
            GatewayEvent::NegotiationUpdate {
                id: response.id,
                listing_id: response.listing_id,
                status: next,
            },
        )
        .await;

    Ok(Json(response))
}

/// The session member's negotiations, newest-first.
pub async fn list_negotiations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NegotiationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let role = match query.role.as_deref() {
        None => None,
        Some("buying") => Some(NegotiationRole::Buying),
        Some("selling") => Some(NegotiationRole::Selling),
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "Unknown role '{other}', expected 'buying' or 'selling'"
            )));
        }
    };

    let db = state.db.clone();
    let member_id = claims.sub.to_string();
    let rows = run_blocking(move || db.list_negotiations_for_member(&member_id, role)).await?;

    let negotiations: Vec<NegotiationResponse> =
        rows.into_iter().map(negotiation_response).collect();
    Ok(Json(negotiations))
}
