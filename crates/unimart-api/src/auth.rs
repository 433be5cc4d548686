use std::path::PathBuf;
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use unimart_db::Database;
use unimart_gateway::dispatcher::Dispatcher;
use unimart_types::api::{
    Claims, LoginRequest, LoginResponse, MeResponse, RegisterRequest, RegisterResponse,
};

use crate::error::{ApiError, run_blocking};
use crate::parse_uuid;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub email_domain: String,
    pub upload_dir: PathBuf,
}

/// Split an email into (local part, domain). Requires exactly one '@'
/// with non-empty parts on both sides.
fn split_email(email: &str) -> Option<(&str, &str)> {
    let mut parts = email.split('@');
    let local = parts.next()?;
    let domain = parts.next()?;
    if parts.next().is_some() || local.is_empty() || domain.is_empty() {
        return None;
    }
    Some((local, domain))
}

/// The campus gate: registration and ordinary sign-in are restricted to
/// the configured institutional domain. Checked before any DB access.
fn require_campus_email<'a>(email: &'a str, required_domain: &str) -> Result<&'a str, ApiError> {
    let (local, domain) = split_email(email)
        .ok_or_else(|| ApiError::BadRequest("Enter a valid email address".into()))?;
    if !domain.eq_ignore_ascii_case(required_domain) {
        return Err(ApiError::BadRequest(format!(
            "Only @{required_domain} addresses may use the marketplace"
        )));
    }
    Ok(local)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let local = require_campus_email(&email, &state.email_domain)?;

    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }

    // Handle and display name default to the email local part.
    let handle = local.to_string();
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&handle)
        .to_string();
    let course = req
        .course
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("Password hashing failed: {e}")))?
        .to_string();

    let member_id = Uuid::new_v4();
    let db = state.db.clone();
    let id = member_id.to_string();
    let email_arg = email.clone();
    let handle_arg = handle.clone();
    run_blocking(move || {
        db.create_member(
            &id,
            &email_arg,
            &handle_arg,
            &display_name,
            course.as_deref(),
            &password_hash,
        )
    })
    .await?;

    let token = create_token(&state.jwt_secret, member_id, &handle)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            member_id,
            handle,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    require_campus_email(&email, &state.email_domain)?;
    let member = verify_credentials(&state, email, req.password).await?;

    let member_id = parse_uuid(&member.id, "member id");
    let token = create_token(&state.jwt_secret, member_id, &member.handle)?;

    Ok(Json(LoginResponse {
        member_id,
        handle: member.handle,
        token,
    }))
}

/// The administrative login path. Exempt from the domain gate, but only
/// members holding an admin grant get a session out of it.
pub async fn admin_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let member = verify_credentials(&state, email, req.password).await?;

    let db = state.db.clone();
    let id = member.id.clone();
    let (is_admin, _) = run_blocking(move || db.admin_flags(&id)).await?;
    if !is_admin {
        return Err(ApiError::Forbidden("Admin authority required".into()));
    }

    let member_id = parse_uuid(&member.id, "member id");
    let token = create_token(&state.jwt_secret, member_id, &member.handle)?;

    Ok(Json(LoginResponse {
        member_id,
        handle: member.handle,
        token,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let (member, flags) = run_blocking(move || {
        let member = db
            .get_member_by_id(&id)?
            .ok_or_else(|| unimart_db::StoreError::NotFound(format!("Member not found: {id}")))?;
        let flags = db.admin_flags(&member.id)?;
        Ok((member, flags))
    })
    .await?;

    Ok(Json(MeResponse {
        id: parse_uuid(&member.id, "member id"),
        email: member.email,
        handle: member.handle,
        display_name: member.display_name,
        course: member.course,
        avatar_url: member.avatar_url,
        is_admin: flags.0,
        is_master: flags.1,
        created_at: unimart_db::models::parse_timestamp(&member.created_at),
    }))
}

/// Look up a member by email and verify the password. Deliberately does
/// not distinguish unknown email from wrong password.
async fn verify_credentials(
    state: &AppState,
    email: String,
    password: String,
) -> Result<unimart_db::models::MemberRow, ApiError> {
    let db = state.db.clone();
    let member = run_blocking(move || db.get_member_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&member.password)
        .map_err(|e| ApiError::Internal(format!("Corrupt password hash: {e}")))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    Ok(member)
}

fn create_token(secret: &str, member_id: Uuid, handle: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: member_id,
        handle: handle.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("Token encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campus_gate_accepts_matching_domain_case_insensitively() {
        assert_eq!(
            require_campus_email("jdoe@campus.edu", "campus.edu").unwrap(),
            "jdoe"
        );
        assert_eq!(
            require_campus_email("jdoe@CAMPUS.EDU", "campus.edu").unwrap(),
            "jdoe"
        );
    }

    #[test]
    fn campus_gate_rejects_foreign_and_malformed_addresses() {
        for email in [
            "jdoe@gmail.com",
            "jdoe@campus.edu.evil.com",
            "jdoe",
            "@campus.edu",
            "jdoe@",
            "a@b@campus.edu",
        ] {
            assert!(
                require_campus_email(email, "campus.edu").is_err(),
                "{email} should be rejected"
            );
        }
    }
}
