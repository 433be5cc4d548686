use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use unimart_db::models::{AdminMemberRow, GrantRow, parse_timestamp};
use unimart_types::api::{AdminMemberResponse, Claims, CreateGrantRequest, GrantResponse};

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::listings::listing_response;
use crate::parse_uuid;

fn admin_member_response(row: AdminMemberRow) -> AdminMemberResponse {
    AdminMemberResponse {
        id: parse_uuid(&row.id, "member id"),
        email: row.email,
        handle: row.handle,
        display_name: row.display_name,
        course: row.course,
        is_admin: row.is_admin,
        is_master: row.is_master,
        created_at: parse_timestamp(&row.created_at),
    }
}

fn grant_response(row: GrantRow) -> GrantResponse {
    GrantResponse {
        member_id: parse_uuid(&row.member_id, "member id"),
        handle: row.handle,
        is_master: row.is_master,
        granted_by: row.granted_by.map(|id| parse_uuid(&id, "granter id")),
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Every member with admin flags. Any admin.
pub async fn list_members(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = run_blocking(move || db.list_members_admin()).await?;
    let members: Vec<AdminMemberResponse> = rows.into_iter().map(admin_member_response).collect();
    Ok(Json(members))
}

/// Every listing, for moderation. Any admin.
pub async fn list_listings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = run_blocking(move || db.list_listings(None, None)).await?;
    let listings: Vec<_> = rows.into_iter().map(listing_response).collect();
    Ok(Json(listings))
}

/// Moderation delete. Any admin; the store authorizes the actor.
pub async fn delete_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = listing_id.to_string();
    let actor = claims.sub.to_string();
    run_blocking(move || db.delete_listing(&id, &actor)).await?;

    info!("Admin {} deleted listing {}", claims.handle, listing_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Destructive member removal. Any admin; never self, never the last
/// master. Cascades to listings, negotiations, messages and grants.
pub async fn delete_member(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let target = member_id.to_string();
    let actor = claims.sub.to_string();
    run_blocking(move || db.delete_member(&actor, &target)).await?;

    info!("Admin {} deleted member {}", claims.handle, member_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Grant admin authority by member id. Master only (store-enforced).
pub async fn create_grant(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGrantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let actor = claims.sub.to_string();
    let target = req.member_id.to_string();
    let grant = run_blocking(move || db.upsert_grant(&actor, &target, req.is_master)).await?;

    info!(
        "Master {} granted admin to {} (master: {})",
        claims.handle, req.member_id, req.is_master
    );
    Ok((StatusCode::CREATED, Json(grant_response(grant))))
}

pub async fn promote_grant(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let actor = claims.sub.to_string();
    let target = member_id.to_string();
    let grant = run_blocking(move || db.promote_grant(&actor, &target)).await?;

    info!("Master {} promoted {} to master", claims.handle, member_id);
    Ok(Json(grant_response(grant)))
}

pub async fn demote_grant(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let actor = claims.sub.to_string();
    let target = member_id.to_string();
    let grant = run_blocking(move || db.demote_grant(&actor, &target)).await?;

    info!("Master {} demoted {}", claims.handle, member_id);
    Ok(Json(grant_response(grant)))
}

pub async fn remove_grant(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let actor = claims.sub.to_string();
    let target = member_id.to_string();
    run_blocking(move || db.remove_grant(&actor, &target)).await?;

    info!("Master {} removed admin grant from {}", claims.handle, member_id);
    Ok(StatusCode::NO_CONTENT)
}
