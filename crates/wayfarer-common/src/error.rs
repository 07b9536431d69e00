//! Error types for Wayfarer
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

/// Result type alias using WayfarerError
pub type Result<T> = std::result::Result<T, WayfarerError>;

/// Unified error type for Wayfarer operations
#[derive(Debug, Error)]
pub enum WayfarerError {
    // Tool argument errors
    #[error("Tool argument error: {0}")]
    ToolArgs(#[from] ToolArgError),

    // Body controller errors
    #[error("Body error: {0}")]
    Body(#[from] BodyError),

    // Caller supplied something malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // A collaborator is missing or not ready
    #[error("Unavailable: {0}")]
    Unavailable(String),

    // Reasoning backend errors
    #[error("Backend error: {0}")]
    Backend(String),

    // Cooperative cancellation observed
    #[error("Operation cancelled")]
    Cancelled,

    // Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Tool argument validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolArgError {
    #[error("Tool input must be a JSON object")]
    NotAnObject,

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required field `{field}`")]
    Missing { field: String },

    #[error("Field `{field}` must be {expected}")]
    WrongType { field: String, expected: String },

    #[error("Field `{field}` out of range: {reason}")]
    OutOfRange { field: String, reason: String },

    #[error("Unexpected field `{field}`")]
    Unexpected { field: String },
}

/// Body/motion controller errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BodyError {
    #[error("Not connected")]
    NotConnected,

    #[error("Motion rejected: {0}")]
    Rejected(String),

    #[error("Controller failure: {0}")]
    Failure(String),
}
