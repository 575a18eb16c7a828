//! HTTP surface for the recipe chat pipeline
//!
//! A thin axum layer over the orchestrator: the ask endpoint, session
//! management and a health probe. All pipeline behavior lives in the
//! agent crate; handlers only translate between HTTP and the request
//! types.

pub mod corpus;
pub mod http;

pub use http::{create_router, AppState};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("startup error: {0}")]
    Startup(String),

    #[error("corpus error: {0}")]
    Corpus(String),
}
