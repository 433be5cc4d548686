use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use unimart_types::api::Claims;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

/// Extract and validate the JWT from the Authorization header, inserting
/// the claims into request extensions for downstream handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

/// Layered after `require_auth` on the /admin router: rejects members
/// without any admin grant. This is a pure read — it never provisions
/// members or grants. Master-only operations are additionally enforced by
/// the store commands themselves.
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;

    let db = state.db.clone();
    let member_id = claims.sub.to_string();
    let (is_admin, _) = run_blocking(move || db.admin_flags(&member_id)).await?;

    if !is_admin {
        return Err(ApiError::Forbidden("Admin authority required".into()));
    }

    Ok(next.run(req).await)
}
