use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use unimart_db::models::{MemberRow, parse_timestamp};
use unimart_types::api::{Claims, MemberResponse, UpdateProfileRequest};

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::parse_uuid;

pub(crate) fn member_response(row: MemberRow) -> MemberResponse {
    MemberResponse {
        id: parse_uuid(&row.id, "member id"),
        handle: row.handle,
        display_name: row.display_name,
        course: row.course,
        avatar_url: row.avatar_url,
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Public profile for rendering seller info — no email.
pub async fn get_member(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = member_id.to_string();
    let member = run_blocking(move || db.get_member_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Member not found: {member_id}")))?;

    Ok(Json(member_response(member)))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let member = run_blocking(move || {
        db.update_profile(
            &id,
            req.display_name.as_deref(),
            req.course.as_deref(),
            req.avatar_url.as_deref(),
        )
    })
    .await?;

    Ok(Json(member_response(member)))
}
