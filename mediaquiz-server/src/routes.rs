//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method, StatusCode},
    routing::{delete, get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::handlers::{
    confirm_handler, delete_upload_handler, health, next_image_handler, ready, save_handler,
    stats_handler, status_handler, upload_handler, upload_image_handler, uploaded_handler,
    verify_image_handler, AppState,
};
use crate::openapi::ApiDoc;
use crate::submitter::{SUBMITTER_ID_HEADER, SUBMITTER_NAME_HEADER};

/// Create the application router with default config (for testing)
pub fn create_router(state: AppState) -> Router {
    create_router_with_config(&Config::default(), state)
}

/// Create the application router with custom configuration
pub fn create_router_with_config(config: &Config, state: AppState) -> Router {
    // Configure CORS based on allowed_origins
    let cors = match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            tracing::info!("CORS: Restricting to {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    HeaderName::from_static(SUBMITTER_ID_HEADER),
                    HeaderName::from_static(SUBMITTER_NAME_HEADER),
                ])
        }
        _ => {
            tracing::warn!("CORS: Allowing all origins (dev mode)");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    // Request body limit; multipart extraction has its own default cap
    let body_limit_bytes = config.body_limit_mb * 1024 * 1024;
    let body_limit = RequestBodyLimitLayer::new(body_limit_bytes);

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    // Base router with common layers
    let router = Router::new()
        .route("/upload", post(upload_handler))
        .route("/upload/", post(upload_handler))
        .route("/upload/delete/{id}", delete(delete_upload_handler))
        .route("/upload/save", post(save_handler))
        .route("/upload/status", get(status_handler))
        .route("/upload/uploaded", get(uploaded_handler))
        .route("/upload/image/{item}/{filename}", get(upload_image_handler))
        .route("/verify", get(next_image_handler))
        .route("/verify/", get(next_image_handler))
        .route("/verify/image/{id}", get(verify_image_handler))
        .route("/verify/confirm", post(confirm_handler))
        .route("/verify/stats", get(stats_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(cors)
        .layer(body_limit)
        .layer(timeout);

    // Conditionally apply rate limiting (disabled in tests, enabled in production)
    let governor_conf = if config.rate_limit_enabled {
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_sec)
            .burst_size(config.rate_limit_burst)
            .finish()
    } else {
        None
    };

    match governor_conf {
        Some(governor_conf) => {
            tracing::info!(
                "Rate limiting: {} req/s (burst: {})",
                config.rate_limit_per_sec,
                config.rate_limit_burst
            );
            router
                .layer(GovernorLayer::new(Arc::new(governor_conf)))
                .layer(TraceLayer::new_for_http())
        }
        None => {
            if config.rate_limit_enabled {
                tracing::error!("Rate limiting: invalid configuration, DISABLED");
            } else {
                tracing::warn!("Rate limiting: DISABLED");
            }
            router.layer(TraceLayer::new_for_http())
        }
    }
}
