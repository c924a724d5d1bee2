//! Crowd verification handlers
//!
//! Reviewers page through staged images they have not voted on yet and mark
//! each one as valid, invalid or a duplicate.

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Form, Json,
};
use mediaquiz_core::MediaError;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::handlers::{image_response, AppState};
use crate::submitter::Submitter;
use crate::validation::{parse_confirmation, validate_image_id};

/// Query for the next image to review
#[derive(Debug, Deserialize, IntoParams)]
pub struct NextQuery {
    /// Rotation offset returned by the previous call
    #[param(default = 0, minimum = 0)]
    pub offset: Option<usize>,
}

/// A staged image waiting for votes
#[derive(Debug, Serialize, ToSchema)]
pub struct NextImage {
    /// Rotation offset of this image; send it back to continue from here
    pub offset: usize,
    /// Where to fetch the image bytes
    #[schema(example = "/verify/image/4f1c0d")]
    pub url: String,
    /// Canonical images that look alike
    pub duplicates: Vec<String>,
    #[schema(example = "robin")]
    pub item: String,
    pub id: String,
}

/// Marker returned once every pending image has been reviewed
#[derive(Debug, Serialize, ToSchema)]
pub struct EndOfQueue {
    pub end: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum NextImageResponse {
    Image(NextImage),
    End(EndOfQueue),
}

/// Next image to review
#[utoipa::path(
    get,
    path = "/verify/",
    tag = "Verification",
    params(NextQuery),
    responses(
        (status = 200, description = "Next unseen image, or `{end: true}`", body = NextImageResponse),
        (status = 401, description = "Missing submitter identity"),
        (status = 503, description = "Staging collection unavailable")
    )
)]
pub async fn next_image_handler(
    State(state): State<AppState>,
    submitter: Submitter,
    Query(query): Query<NextQuery>,
) -> Result<Json<NextImageResponse>, ApiError> {
    let offset = query.offset.unwrap_or(0);
    let next = state.review.next_unseen(&submitter.id, offset).await?;

    let response = match next {
        Some(item) => NextImageResponse::Image(NextImage {
            offset: item.offset,
            url: format!("/verify/image/{}", item.id),
            duplicates: item.duplicates,
            item: item.item,
            id: item.id,
        }),
        None => NextImageResponse::End(EndOfQueue { end: true }),
    };
    Ok(Json(response))
}

/// Staged image bytes
#[utoipa::path(
    get,
    path = "/verify/image/{id}",
    tag = "Verification",
    params(("id" = String, Path, description = "Image id")),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 404, description = "No pending image with this id")
    )
)]
pub async fn verify_image_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    validate_image_id(&id).map_err(|_| ApiError::not_found("Image not found"))?;
    let path = match state.review.image_path(&id).await {
        Ok(path) => path,
        Err(MediaError::UnknownImage(_)) => return Err(ApiError::not_found("Image not found")),
        Err(e) => return Err(e.into()),
    };
    image_response(&path).await
}

/// Vote form
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmForm {
    pub id: String,
    /// `valid`, `invalid` or `duplicate`
    #[schema(example = "valid")]
    pub confirmation: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmResponse {
    pub success: bool,
}

/// Vote on a staged image
///
/// Each submitter votes at most once per image.
#[utoipa::path(
    post,
    path = "/verify/confirm",
    tag = "Verification",
    request_body(content = ConfirmForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Vote recorded", body = ConfirmResponse),
        (status = 400, description = "Repeat vote, unknown image or bad confirmation"),
        (status = 401, description = "Missing submitter identity")
    )
)]
pub async fn confirm_handler(
    State(state): State<AppState>,
    submitter: Submitter,
    Form(form): Form<ConfirmForm>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let decision = parse_confirmation(&form.confirmation)?;
    let id = validate_image_id(form.id.trim())?;

    state.review.confirm(&submitter.id, id, decision).await?;
    tracing::info!(submitter = %submitter.id, id, %decision, "Vote recorded");

    Ok(Json(ConfirmResponse { success: true }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsQuery {
    /// Image id
    pub id: String,
}

/// Vote counts for one image
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub valid: u32,
    pub invalid: u32,
    pub duplicate: u32,
}

/// Current vote counts
#[utoipa::path(
    get,
    path = "/verify/stats",
    tag = "Verification",
    params(StatsQuery),
    responses(
        (status = 200, description = "Vote counts", body = StatsResponse),
        (status = 400, description = "Unknown image")
    )
)]
pub async fn stats_handler(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    let id = validate_image_id(query.id.trim())?;
    let stats = state.review.stats(id).await?;
    Ok(Json(StatsResponse {
        valid: stats.valid,
        invalid: stats.invalid,
        duplicate: stats.duplicate,
    }))
}
