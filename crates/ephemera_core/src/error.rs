use crate::store::BackendError;
use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// A wrong admin token is reported as [`EngineError::NotFound`]; there is no
/// separate "unauthorized" variant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The entity or child does not exist, was deleted, or the admin token did not match.
    #[error("not found")]
    NotFound,
    /// The entity exists but is past its expiry.
    #[error("expired")]
    Expired,
    /// `expected_version` did not match the stored version.
    #[error("version conflict (current version {current_version})")]
    Conflict { current_version: u64 },
    /// The parent already holds the maximum number of children.
    #[error("capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },
    /// Input failed structural validation; nothing was read or written.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Backing-store failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound => "not_found",
            EngineError::Expired => "expired",
            EngineError::Conflict { .. } => "conflict",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
