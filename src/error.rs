use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CellstackError {
    #[error("store transport failed: {0}")]
    Transport(String),

    #[error("store returned status {status}: {message}")]
    StoreStatus { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unrecognized format: {0}")]
    FormatUnrecognized(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("object key violates <root>/<study>/<category>/<filename> layout: {0}")]
    ContractViolation(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("missing config file cellstack.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("invalid QC thresholds: {0}")]
    InvalidThresholds(String),

    #[error("dataset is empty after {0}")]
    EmptyDataset(String),
}

impl CellstackError {
    // Per-object failures the catalog walker converts into a skip; everything
    // else aborts the walk.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            CellstackError::NotFound(_)
                | CellstackError::FormatUnrecognized(_)
                | CellstackError::Parse(_)
                | CellstackError::ContractViolation(_)
                | CellstackError::InvalidCategory(_)
        )
    }
}
