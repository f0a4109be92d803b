//! Harness error type.

use std::path::PathBuf;

use thiserror::Error;

use heapgroom_core::GroomError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("engine: {0}")]
    Engine(#[from] GroomError),
    #[error("{path}: {reason}")]
    Input { path: PathBuf, reason: String },
    #[error("{failed} of {total} scenario cases failed")]
    VerificationFailed { failed: usize, total: usize },
    #[error("{errors} schema violations in {lines} log lines")]
    InvalidLog { lines: usize, errors: usize },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
