//! Error types for core operations

use thiserror::Error;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Graph storage error: {0}")]
    Storage(#[from] GraphError),

    #[error("Text generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors related to graph storage operations
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Episode not found: {0}")]
    EpisodeNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),
}

/// Errors related to the rate-governed text-generation channels
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Timeout during text generation")]
    Timeout,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Failed to parse structured output: {0}")]
    MalformedOutput(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for text-generation operations
pub type GenerationResult<T> = Result<T, GenerationError>;
