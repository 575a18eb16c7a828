//! Configuration for the recipe chat service
//!
//! A single source of truth for tuning constants, environment-driven
//! settings and the per-intent prompt templates.

pub mod constants;
pub mod prompts;
pub mod settings;

pub use settings::{LowConfMode, Settings};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
