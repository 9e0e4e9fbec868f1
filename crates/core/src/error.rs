// Central Error Type for the Engine

use thiserror::Error;

/// Engine-level error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::port::StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] crate::port::ChannelError),

    #[error("Stage error: {0}")]
    Stage(#[from] crate::port::StageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
