//! Error types for the helpdesk chain.
//!
//! Only hard failures are represented here. Malformed model output and
//! disabled feature gates are absorbed by the step that saw them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Flag backend unavailable: {0}")]
    FlagBackend(String),

    #[error("Model service error: {0}")]
    Model(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Chain ended without a result")]
    Incomplete,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChainError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::FlagBackend(_) => "flag_backend",
            ChainError::Model(_) => "model",
            ChainError::Http(_) => "http",
            ChainError::Config(_) => "config",
            ChainError::Worker(_) => "worker",
            ChainError::Incomplete => "incomplete",
            ChainError::Io(_) => "io",
            ChainError::Json(_) => "json",
        }
    }
}
