use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use unimart_db::StoreError;

/// HTTP-facing error. Handlers return this; the body is a short
/// user-facing message, internals are logged and never leaked.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "VALIDATION", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "STATE", msg.clone()),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "TOO_LARGE", msg.clone())
            }
            ApiError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(msg) => ApiError::BadRequest(msg),
            StoreError::Authorization(msg) => ApiError::Forbidden(msg),
            StoreError::State(msg) => ApiError::Conflict(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Sqlite(e) => ApiError::Internal(e.to_string()),
            StoreError::Unavailable(msg) => ApiError::Internal(msg),
        }
    }
}

/// Run a blocking DB command off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_http_categories() {
        let cases = [
            (StoreError::Validation("v".into()), StatusCode::BAD_REQUEST),
            (StoreError::Authorization("a".into()), StatusCode::FORBIDDEN),
            (StoreError::State("s".into()), StatusCode::CONFLICT),
            (StoreError::NotFound("n".into()), StatusCode::NOT_FOUND),
            (
                StoreError::Unavailable("u".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (store, expected) in cases {
            let response = ApiError::from(store).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
