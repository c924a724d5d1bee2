//! MediaQuiz Server Library - REST API components for crowd-sourced image collection
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod multipart;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod submitter;
pub mod validation;

pub use config::Config;
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config};
pub use state::{AppState, Services};
pub use submitter::{Submitter, SUBMITTER_ID_HEADER, SUBMITTER_NAME_HEADER};
