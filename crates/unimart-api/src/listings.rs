use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use unimart_db::models::{ListingRow, parse_timestamp};
use unimart_types::api::{Claims, CreateListingRequest, ListingResponse};
use unimart_types::models::Condition;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::parse_uuid;

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    /// Free-text match against title and description.
    pub q: Option<String>,
    /// Exact category filter.
    pub category: Option<String>,
}

pub(crate) fn listing_response(row: ListingRow) -> ListingResponse {
    let condition = Condition::parse(&row.condition).unwrap_or_else(|| {
        warn!("Corrupt condition '{}' on listing '{}'", row.condition, row.id);
        Condition::Good
    });
    ListingResponse {
        id: parse_uuid(&row.id, "listing id"),
        seller_id: parse_uuid(&row.seller_id, "seller id"),
        seller_handle: row.seller_handle,
        title: row.title,
        description: row.description,
        price_cents: row.price_cents,
        category: row.category,
        condition,
        image_url: row.image_url,
        created_at: parse_timestamp(&row.created_at),
    }
}

pub async fn create_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let listing_id = Uuid::new_v4();

    let db = state.db.clone();
    let id = listing_id.to_string();
    let seller_id = claims.sub.to_string();
    let row = run_blocking(move || {
        db.create_listing(
            &id,
            &seller_id,
            &req.title,
            &req.description,
            req.price_cents,
            &req.category,
            req.condition.as_str(),
            req.image_url.as_deref(),
        )
    })
    .await?;

    Ok((StatusCode::CREATED, Json(listing_response(row))))
}

/// All listings newest-first, optionally filtered.
pub async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = run_blocking(move || {
        db.list_listings(query.q.as_deref(), query.category.as_deref())
    })
    .await?;

    let listings: Vec<ListingResponse> = rows.into_iter().map(listing_response).collect();
    Ok(Json(listings))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = listing_id.to_string();
    let row = run_blocking(move || db.get_listing(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Listing not found: {listing_id}")))?;

    Ok(Json(listing_response(row)))
}

/// Owner or any admin; the store enforces it either way.
pub async fn delete_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = listing_id.to_string();
    let requester = claims.sub.to_string();
    run_blocking(move || db.delete_listing(&id, &requester)).await?;

    Ok(StatusCode::NO_CONTENT)
}
