//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mediaquiz_core::MediaError;
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized - missing submitter identity
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not found - requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable - background worker or upstream is down
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Error from the media pipeline
    #[error("Pipeline error: {0}")]
    Media(#[from] MediaError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Media(ref e) => match e {
                // Client-provided invalid input → 400
                MediaError::AlreadyVoted { .. }
                | MediaError::UnknownItem(_)
                | MediaError::UnknownImage(_)
                | MediaError::InvalidUpload(_) => StatusCode::BAD_REQUEST,

                MediaError::JobAlreadyRunning { .. } => StatusCode::CONFLICT,

                MediaError::NotFound(_)
                | MediaError::NoImagesFound { .. }
                | MediaError::NoValidImages { .. } => StatusCode::NOT_FOUND,

                // Remote collections or locks unavailable → 503
                MediaError::RepoSyncFailure { .. }
                | MediaError::IndexUnavailable { .. }
                | MediaError::PushFailure { .. }
                | MediaError::LockTimeout { .. }
                | MediaError::HttpError(_) => StatusCode::SERVICE_UNAVAILABLE,

                // Internal processing failures → 500
                MediaError::StaleLease { .. }
                | MediaError::ChangesNotCommitted { .. }
                | MediaError::ManifestParse { .. }
                | MediaError::PerceptualHashError(_)
                | MediaError::Config(_)
                | MediaError::TaskFailed(_)
                | MediaError::Io(_)
                | MediaError::Git(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Media(ref e) => match e {
                MediaError::AlreadyVoted { .. } => "ALREADY_VOTED",
                MediaError::UnknownItem(_) => "UNKNOWN_ITEM",
                MediaError::UnknownImage(_) => "UNKNOWN_IMAGE",
                MediaError::InvalidUpload(_) => "INVALID_UPLOAD",
                MediaError::JobAlreadyRunning { .. } => "JOB_ALREADY_RUNNING",
                MediaError::NotFound(_) => "NOT_FOUND",
                MediaError::NoImagesFound { .. } => "NO_IMAGES_FOUND",
                MediaError::NoValidImages { .. } => "NO_VALID_IMAGES",
                MediaError::RepoSyncFailure { .. } => "REPO_SYNC_FAILURE",
                MediaError::IndexUnavailable { .. } => "INDEX_UNAVAILABLE",
                MediaError::PushFailure { .. } => "PUSH_FAILURE",
                MediaError::LockTimeout { .. } => "LOCK_TIMEOUT",
                MediaError::HttpError(_) => "UPSTREAM_ERROR",
                MediaError::StaleLease { .. } => "STALE_LEASE",
                MediaError::ChangesNotCommitted { .. } => "CHANGES_NOT_COMMITTED",
                MediaError::ManifestParse { .. } => "MANIFEST_PARSE_ERROR",
                MediaError::PerceptualHashError(_) => "PERCEPTUAL_HASH_ERROR",
                MediaError::Config(_) => "CONFIG_ERROR",
                MediaError::TaskFailed(_) => "TASK_FAILED",
                MediaError::Io(_) => "IO_ERROR",
                MediaError::Git(_) => "GIT_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Media(ref e) => match e {
                // Safe to echo: these describe the request itself
                MediaError::AlreadyVoted { .. } => "You've already confirmed this image".to_string(),
                MediaError::UnknownItem(item) => format!("Unknown item: {item}"),
                MediaError::UnknownImage(_) => "Invalid image id".to_string(),
                MediaError::InvalidUpload(reason) => format!("Invalid upload: {reason}"),
                MediaError::JobAlreadyRunning { .. } => "A save is already in progress".to_string(),
                MediaError::NotFound(what) => format!("Not found: {what}"),
                MediaError::NoImagesFound { item } | MediaError::NoValidImages { item, .. } => {
                    format!("No images available for {item}")
                }
                MediaError::RepoSyncFailure { .. }
                | MediaError::IndexUnavailable { .. }
                | MediaError::PushFailure { .. }
                | MediaError::LockTimeout { .. }
                | MediaError::HttpError(_) => "Image collection temporarily unavailable".to_string(),
                _ => "Internal server error".to_string(),
            },
            // For other errors, use the Display message
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Media(_) => "media",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Authentication error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        // All error responses include a `code` field for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_status_codes() {
        let running = ApiError::from(MediaError::JobAlreadyRunning {
            submitter: "u1".into(),
        });
        assert_eq!(running.status_code(), StatusCode::CONFLICT);
        assert_eq!(running.error_code(), "JOB_ALREADY_RUNNING");

        let voted = ApiError::from(MediaError::AlreadyVoted {
            image_id: "x".into(),
            submitter: "u1".into(),
        });
        assert_eq!(voted.status_code(), StatusCode::BAD_REQUEST);

        let sync = ApiError::from(MediaError::IndexUnavailable {
            url: "https://example.test/ids.csv".into(),
            reason: "timeout".into(),
        });
        assert_eq!(sync.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_internal_details_are_not_echoed() {
        let err = ApiError::from(MediaError::RepoSyncFailure {
            dir: "/srv/secret/path".into(),
            reason: "auth failed for token abc".into(),
        });
        let message = err.client_message();
        assert!(!message.contains("/srv/secret"));
        assert!(!message.contains("abc"));
    }
}
