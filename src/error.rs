//! Error types shared across the crate.

use thiserror::Error;

use crate::solver::backend::BackendError;

#[derive(Error, Debug)]
pub enum LiquidError {
    /// The configuration can never produce a working simulation.
    #[error("liquid configuration error: {0}")]
    Config(String),
    /// Persisted data is corrupt or of the wrong version.
    #[error("invalid liquid data: {0}")]
    Data(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to read liquid file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse liquid config: {0}")]
    Json(#[from] serde_json::Error),
}

pub type LiquidResult<T> = Result<T, LiquidError>;
