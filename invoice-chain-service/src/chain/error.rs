use service_core::error::AppError;
use thiserror::Error;
use tonic::Status;

/// Errors raised while issuing a document on a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Invalid draft: {0}")]
    InvalidDraft(String),

    #[error("Referenced invoice not found: {0}")]
    ReferenceNotFound(String),

    /// Another writer persisted the same sequence number first. Transient.
    #[error("Sequence number {sequence_number} already exists")]
    DuplicateSequence { sequence_number: String },

    /// Nothing was persisted.
    #[error("Chain build failed after {attempts} attempt(s): {reason}")]
    BuildFailure { attempts: u32, reason: String },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl ChainError {
    pub fn is_duplicate_sequence(&self) -> bool {
        matches!(self, ChainError::DuplicateSequence { .. })
    }
}

impl From<validator::ValidationErrors> for ChainError {
    fn from(err: validator::ValidationErrors) -> Self {
        ChainError::InvalidDraft(err.to_string())
    }
}

impl From<ChainError> for AppError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidDraft(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ChainError::ReferenceNotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            e @ ChainError::DuplicateSequence { .. } => AppError::Conflict(anyhow::Error::new(e)),
            e @ ChainError::BuildFailure { .. } => AppError::Aborted(anyhow::Error::new(e)),
            ChainError::Store(e) => e,
        }
    }
}

impl From<ChainError> for Status {
    fn from(err: ChainError) -> Self {
        AppError::from(err).into()
    }
}
