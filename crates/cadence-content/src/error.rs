//! Error types for agent content.

use thiserror::Error;

/// Errors that can occur when loading or saving agent content.
#[derive(Debug, Error)]
pub enum ContentError {
    /// No document exists for the agent.
    #[error("agent not found: {0}")]
    NotFound(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document could not be parsed.
    #[error("malformed agent document for {agent}: {source}")]
    Malformed {
        agent: String,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
