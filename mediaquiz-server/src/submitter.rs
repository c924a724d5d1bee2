//! Submitter identity extractor
//!
//! Upload and verification endpoints act on behalf of a submitter. The
//! identity comes from request headers set by the fronting proxy.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Header carrying the stable submitter id
pub const SUBMITTER_ID_HEADER: &str = "x-submitter-id";
/// Optional header carrying a display name for notifications and commits
pub const SUBMITTER_NAME_HEADER: &str = "x-submitter-name";

const MAX_ID_LEN: usize = 64;

/// Identity of the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
    pub id: String,
    pub name: String,
}

impl<S> FromRequestParts<S> for Submitter
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, SUBMITTER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing X-Submitter-Id header"))?;

        if id.len() > MAX_ID_LEN
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ApiError::unauthorized("Malformed X-Submitter-Id header"));
        }

        let name = header_value(parts, SUBMITTER_NAME_HEADER).unwrap_or_else(|| id.clone());
        Ok(Self { id, name })
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
