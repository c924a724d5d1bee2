//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod health;
pub mod upload;
pub mod verify;

use std::path::Path;

use axum::{
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

pub use crate::state::AppState;
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use upload::{
    delete_upload_handler, save_handler, status_handler, upload_handler, upload_image_handler,
    uploaded_handler, DeleteResponse, UploadResponse,
};
pub use verify::{
    confirm_handler, next_image_handler, stats_handler, verify_image_handler, ConfirmForm,
    ConfirmResponse, EndOfQueue, NextImage, NextImageResponse, StatsResponse,
};

/// Content type served for an image file, by extension
pub(crate) fn image_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Read an image file and return it with a matching Content-Type
pub(crate) async fn image_response(path: &Path) -> Result<Response, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found("Image not found")
        } else {
            ApiError::Media(e.into())
        }
    })?;

    Ok(([(header::CONTENT_TYPE, image_content_type(path))], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_content_type() {
        assert_eq!(image_content_type(Path::new("a/b.PNG")), "image/png");
        assert_eq!(image_content_type(Path::new("x.jpeg")), "image/jpeg");
        assert_eq!(image_content_type(Path::new("noext")), "application/octet-stream");
    }
}
