//! Error types for publishing.

use std::time::Duration;

use thiserror::Error;

/// Errors from the authentication handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials are configured.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The service refused the configured credentials.
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// The service could not be reached or answered unexpectedly.
    #[error("authentication unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// Whether the failure is caused by missing or wrong credentials.
    pub fn is_credentials(&self) -> bool {
        matches!(self, Self::MissingCredentials(_) | Self::Rejected(_))
    }

    /// Actionable message for the operator.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::MissingCredentials(_) => {
                "Missing credentials. Set CADENCE_HANDLE and CADENCE_APP_PASSWORD."
            }
            Self::Rejected(_) => {
                "Incorrect credentials. Check the configured handle and app password."
            }
            Self::Unavailable(_) => "Could not log in. Check CADENCE_PDS_URL and your network.",
        }
    }
}

/// Errors from publishing a single post.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Not authenticated, or the session was rejected.
    #[error("missing or invalid credentials: {0}")]
    Credentials(String),

    /// Nothing to publish.
    #[error("post content is empty")]
    EmptyContent,

    /// The request never reached the service, or the service reported a
    /// temporary failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Rate limited.
    #[error("rate limited{}", retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network failure after the request may have been delivered.
    #[error("network error: {0}")]
    Network(String),

    /// The service refused the post.
    #[error("post rejected: {0}")]
    Rejected(String),

    /// The service answered with something unreadable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The publish call did not finish in time.
    #[error("publish timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl PublishError {
    /// Whether retrying cannot produce a duplicate post.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Whether the operator must fix credentials before posting can succeed.
    pub fn is_credentials(&self) -> bool {
        matches!(self, Self::Credentials(_))
    }
}
