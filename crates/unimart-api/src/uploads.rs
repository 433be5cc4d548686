use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use unimart_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// 5 MB upload limit for listing images
const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

#[derive(Serialize)]
pub struct UploadResponse {
    pub url: String,
}

/// Lowercased extension of the uploaded filename, if it is an allowed
/// image type.
fn image_extension(filename: &str) -> Option<String> {
    let ext = std::path::Path::new(filename)
        .extension()?
        .to_str()?
        .to_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// POST /uploads/{filename} — accepts raw image bytes, stores them under a
/// fresh uuid name, returns the publicly retrievable URL. The file itself
/// is served statically by the server binary under /media.
pub async fn upload_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Extension(_claims): Extension<Claims>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ext = image_extension(&filename).ok_or_else(|| {
        ApiError::BadRequest("Only jpg, jpeg, png and gif uploads are allowed".into())
    })?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Upload is empty".into()));
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ApiError::PayloadTooLarge("Images are limited to 5 MB".into()));
    }

    let stored_name = format!("{}.{}", Uuid::new_v4(), ext);

    tokio::fs::create_dir_all(&state.upload_dir).await.map_err(|e| {
        error!("Failed to create upload directory: {}", e);
        ApiError::Internal(e.to_string())
    })?;

    let path = state.upload_dir.join(&stored_name);
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        error!("Failed to write upload {}: {}", path.display(), e);
        ApiError::Internal(e.to_string())
    })?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: format!("/media/{stored_name}"),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_image_extensions_case_insensitively() {
        assert_eq!(image_extension("photo.jpg").as_deref(), Some("jpg"));
        assert_eq!(image_extension("photo.JPEG").as_deref(), Some("jpeg"));
        assert_eq!(image_extension("scan.PNG").as_deref(), Some("png"));
        assert_eq!(image_extension("anim.gif").as_deref(), Some("gif"));
    }

    #[test]
    fn rejects_everything_else() {
        for name in ["payload.exe", "notes.pdf", "archive.tar.gz", "noext", ".jpg"] {
            assert_eq!(image_extension(name), None, "{name} should be rejected");
        }
    }
}
