//! Error types for the scheduler.

use thiserror::Error;

use cadence_content::ContentError;
use cadence_publisher::AuthError;

/// Errors from the durable key-value file.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The state file could not be parsed or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur in scheduler commands.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The agent's content could not be loaded.
    #[error("failed to load agent content: {0}")]
    ContentLoad(#[from] ContentError),

    /// Logging in to the publisher failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A command needs a selected agent.
    #[error("no agent selected")]
    NoAgentSelected,

    /// The active agent cannot change while a run is in progress.
    #[error("cannot switch from {current} to {requested} while posting")]
    AgentSwitchWhilePosting { current: String, requested: String },

    /// A run is already in progress.
    #[error("already posting")]
    AlreadyPosting,

    /// No post carries the given id.
    #[error("post not found: {0}")]
    PostNotFound(String),

    /// Saving agent content failed.
    #[error("failed to save agent content: {0}")]
    Persistence(#[source] ContentError),

    /// Scheduler state could not be persisted.
    #[error("state store error: {0}")]
    StateStore(#[from] StateStoreError),
}
