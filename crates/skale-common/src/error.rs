use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A view call returned nothing (or reverted without data). Enumeration
    /// loops use this as their terminator.
    #[error("Empty response")]
    EmptyResponse,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexerError {
    pub fn status_code(&self) -> u16 {
        match self {
            IndexerError::NotFound(_) => 404,
            IndexerError::InvalidParameter(_) => 400,
            IndexerError::NotSupported(_) => 501,
            IndexerError::Transport(_) | IndexerError::Timeout(_) => 502,
            IndexerError::Database(_)
            | IndexerError::EmptyResponse
            | IndexerError::Decode(_)
            | IndexerError::Config(_)
            | IndexerError::Internal(_) => 500,
        }
    }

    /// Failures an outer orchestrator may retry. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::Transport(_) | IndexerError::Timeout(_) | IndexerError::Database(_)
        )
    }

    pub fn is_empty_response(&self) -> bool {
        matches!(self, IndexerError::EmptyResponse)
    }
}

pub type Result<T, E = IndexerError> = std::result::Result<T, E>;
