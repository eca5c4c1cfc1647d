//! Shared error types for the tutoring core.

use thiserror::Error;

/// Errors surfaced by content store adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("session document schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors emitted by the tutoring orchestrator.
///
/// Language-model failures never appear here: they are degraded to fallback
/// text or fallback scores before they reach the orchestrator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TutorError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
