//! Upload handlers
//!
//! Submitters stage images per item, review and prune them, then ask the
//! background worker to save the batch into the staging collection.

use std::collections::BTreeMap;

use axum::{
    extract::{Multipart, Path, State},
    response::Response,
    Json,
};
use mediaquiz_core::{Job, JobStatus, MediaError, UploadIndex};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::handlers::{image_response, AppState};
use crate::multipart::MultipartFields;
use crate::submitter::Submitter;
use crate::validation::{validate_image_id, validate_item};

/// Per-file outcome of an upload, keyed by original filename
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// Files that are not a supported image or are too large
    pub invalid: Vec<String>,
    /// Files already present in a published collection
    pub rejected: Vec<String>,
    /// Accepted files that look like existing canonical images
    pub duplicates: BTreeMap<String, Vec<String>>,
    /// Image id of every accepted file
    pub ids: BTreeMap<String, String>,
}

/// Stage images for one item
///
/// Accepts multipart/form-data with:
/// - **item** (required): the item the images show
/// - **file** (repeatable): JPEG or PNG images
///
/// Exact copies of published images are rejected without being stored.
/// Near duplicates are stored and reported.
#[utoipa::path(
    post,
    path = "/upload/",
    tag = "Upload",
    request_body(
        content_type = "multipart/form-data",
        description = "Item name and image files"
    ),
    responses(
        (status = 200, description = "Upload processed", body = UploadResponse),
        (status = 400, description = "Missing item, unknown item or too many files"),
        (status = 401, description = "Missing submitter identity"),
        (status = 503, description = "Published manifests unavailable")
    )
)]
pub async fn upload_handler(
    State(state): State<AppState>,
    submitter: Submitter,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut fields = MultipartFields::parse(&mut multipart, state.max_files_per_upload).await?;
    let item = validate_item(fields.require_text("item")?)?;
    if !state.catalog.contains(&item) {
        return Err(MediaError::UnknownItem(item).into());
    }

    let uploads = fields
        .take_files()?
        .into_iter()
        .enumerate()
        .map(|(i, file)| file.into_upload(i + 1))
        .collect();

    let index = UploadIndex::build(state.fetcher.as_ref(), &state.manifest_sources).await?;
    let report = state
        .uploads
        .stage_batch(&submitter.id, &item, uploads, &index)
        .await?;

    tracing::info!(
        submitter = %submitter.id,
        item = %item,
        accepted = report.ids.len(),
        rejected = report.rejected.len(),
        invalid = report.invalid.len(),
        "Upload processed"
    );

    let duplicates = report
        .duplicates
        .into_iter()
        .map(|(name, matches)| {
            let urls = matches
                .into_iter()
                .map(|m| format!("{}{}", state.base_image_url, m.path))
                .collect();
            (name, urls)
        })
        .collect();

    Ok(Json(UploadResponse {
        invalid: report.invalid,
        rejected: report.rejected,
        duplicates,
        ids: report.ids,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// Remove one staged image
#[utoipa::path(
    delete,
    path = "/upload/delete/{id}",
    tag = "Upload",
    params(("id" = String, Path, description = "Image id returned by the upload")),
    responses(
        (status = 200, description = "Image removed", body = DeleteResponse),
        (status = 400, description = "Malformed image id"),
        (status = 404, description = "No such staged image")
    )
)]
pub async fn delete_upload_handler(
    State(state): State<AppState>,
    submitter: Submitter,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = validate_image_id(id.trim())?;
    state.uploads.delete_staged(&submitter.id, id).await?;
    Ok(Json(DeleteResponse { deleted: true }))
}

/// Save staged images into the staging collection
///
/// Queues a background job and returns its record immediately. Poll
/// `/upload/status` for progress.
#[utoipa::path(
    post,
    path = "/upload/save",
    tag = "Upload",
    responses(
        (status = 200, description = "Job queued"),
        (status = 404, description = "Nothing staged"),
        (status = 409, description = "A save is already in progress"),
        (status = 503, description = "Background worker unavailable")
    )
)]
pub async fn save_handler(
    State(state): State<AppState>,
    submitter: Submitter,
) -> Result<Json<JobStatus>, ApiError> {
    let status = state.jobs.begin(&submitter.id)?;

    let session = match state.uploads.list_staged(&submitter.id).await {
        Ok(session) => session,
        Err(e) => {
            state.jobs.abandon(&submitter.id);
            return Err(e.into());
        }
    };
    if session.is_empty() {
        state.jobs.abandon(&submitter.id);
        return Err(ApiError::not_found("No uploaded images"));
    }

    let job = Job::SaveUploads {
        submitter: submitter.id.clone(),
        display_name: submitter.name.clone(),
    };
    if let Err(e) = state.queue.submit(job) {
        state.jobs.abandon(&submitter.id);
        tracing::error!(submitter = %submitter.id, error = %e, "Could not queue save job");
        return Err(ApiError::service_unavailable("Background worker unavailable"));
    }

    tracing::info!(
        submitter = %submitter.id,
        images = session.images.len(),
        "Save job queued"
    );
    Ok(Json(status))
}

/// Current save job record
#[utoipa::path(
    get,
    path = "/upload/status",
    tag = "Upload",
    responses(
        (status = 200, description = "Job record"),
        (status = 404, description = "No recent job")
    )
)]
pub async fn status_handler(
    State(state): State<AppState>,
    submitter: Submitter,
) -> Result<Json<JobStatus>, ApiError> {
    state
        .jobs
        .get(&submitter.id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No save job"))
}

/// Staged filenames grouped by item
#[utoipa::path(
    get,
    path = "/upload/uploaded",
    tag = "Upload",
    responses(
        (status = 200, description = "`{item: [filename]}`")
    )
)]
pub async fn uploaded_handler(
    State(state): State<AppState>,
    submitter: Submitter,
) -> Result<Json<BTreeMap<String, Vec<String>>>, ApiError> {
    let session = state.uploads.list_staged(&submitter.id).await?;
    Ok(Json(session.by_item()))
}

/// Preview a staged image
#[utoipa::path(
    get,
    path = "/upload/image/{item}/{filename}",
    tag = "Upload",
    params(
        ("item" = String, Path, description = "Item name"),
        ("filename" = String, Path, description = "Staged filename")
    ),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 404, description = "No such staged image")
    )
)]
pub async fn upload_image_handler(
    State(state): State<AppState>,
    submitter: Submitter,
    Path((item, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = match state.uploads.staged_file(&submitter.id, &item, &filename).await {
        Ok(path) => path,
        Err(MediaError::InvalidUpload(_)) => return Err(ApiError::not_found("Image not found")),
        Err(e) => return Err(e.into()),
    };
    image_response(&path).await
}
