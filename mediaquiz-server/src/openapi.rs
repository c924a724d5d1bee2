//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::handlers::{
    ConfirmForm, ConfirmResponse, DeleteResponse, EndOfQueue, HealthResponse, NextImage,
    NextImageResponse, ReadyResponse, StatsResponse, UploadResponse,
};

/// MediaQuiz API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "MediaQuiz API",
        version = "0.1.0",
        description = r#"
## Crowd-sourced image collection for a quiz game

Submitters upload photos of quiz items. Uploads pass an exact-duplicate check
against every published collection and a perceptual near-duplicate check
against the canonical collection, then wait in a staging collection.

Reviewers vote on each staged image. Once enough votes agree, a periodic
promotion moves the image into the canonical collection or drops it.

Every request that acts for a person carries an `X-Submitter-Id` header and
optionally `X-Submitter-Name`.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Upload", description = "Stage, review and save uploaded images"),
        (name = "Verification", description = "Vote on staged images"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::upload::upload_handler,
        crate::handlers::upload::delete_upload_handler,
        crate::handlers::upload::save_handler,
        crate::handlers::upload::status_handler,
        crate::handlers::upload::uploaded_handler,
        crate::handlers::upload::upload_image_handler,
        crate::handlers::verify::next_image_handler,
        crate::handlers::verify::verify_image_handler,
        crate::handlers::verify::confirm_handler,
        crate::handlers::verify::stats_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            UploadResponse,
            DeleteResponse,
            NextImage,
            EndOfQueue,
            NextImageResponse,
            ConfirmForm,
            ConfirmResponse,
            StatsResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_endpoints() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        assert!(paths.contains(&"/upload/".to_string()));
        assert!(paths.contains(&"/verify/confirm".to_string()));
        assert!(paths.contains(&"/health".to_string()));
    }
}
