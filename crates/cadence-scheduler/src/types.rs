//! Scheduler types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the posting loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// No agent selected.
    Idle,
    /// An agent is loaded and the loop is not running.
    Ready,
    /// A run is publishing posts.
    Posting,
    /// A run was stopped by request.
    Stopped,
}

impl LoopPhase {
    pub fn is_posting(self) -> bool {
        self == Self::Posting
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Posting => "posting",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Timer and loop state, as persisted and displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Minutes between posts.
    pub delay_between_posts: u32,
    /// Seconds until the next post.
    pub time_left: u32,
    /// Whether a post has ever been published.
    pub has_posted: bool,
    /// Whether a run is in progress. Never persisted.
    #[serde(skip)]
    pub is_posting: bool,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            delay_between_posts: crate::DEFAULT_DELAY_MINUTES,
            time_left: crate::DEFAULT_DELAY_MINUTES * 60,
            has_posted: false,
            is_posting: false,
        }
    }
}

/// Snapshot returned by [`crate::PostingScheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub phase: LoopPhase,
    /// Identifier of the selected agent.
    pub agent: Option<String>,
    pub state: SchedulerState,
    pub unposted_count: usize,
    /// Whether the publisher session is established for the selected agent.
    pub logged_in: bool,
    /// A post was published but the document recording it failed to save.
    pub content_unsynced: bool,
}

/// Outcome of [`crate::PostingScheduler::start_loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStart {
    /// A run started with this many queued posts.
    Started { queued: usize },
    /// Every post is already published.
    NothingToPost,
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub published: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Whether the run ended because of `stop_loop`.
    pub stopped: bool,
}

/// Progress notifications from the posting loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingEvent {
    /// A post was published and recorded.
    Published {
        post_id: String,
        label: String,
        uri: Option<String>,
    },
    /// Publishing failed; the post stays unposted.
    PublishFailed {
        post_id: String,
        label: String,
        error: String,
        /// The operator must fix credentials for later posts to succeed.
        needs_credentials: bool,
    },
    /// A post was published but saving the document failed.
    PersistenceFailed { post_id: String, error: String },
    /// A queued post was already published when its turn came.
    Skipped { post_id: String },
    /// The run is waiting before the next post.
    Waiting { seconds: u64 },
    /// The run ended.
    RunFinished(RunSummary),
}

/// Tuning knobs for publishing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on a single publish call.
    pub publish_timeout: Duration,
    /// Total attempts for a retryable failure, including the first.
    pub max_publish_attempts: u32,
    /// Pause before a retry when the service gives no hint.
    pub retry_backoff: Duration,
    /// Upper bound on a service-requested retry pause.
    pub max_retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(30),
            max_publish_attempts: 2,
            retry_backoff: Duration::from_secs(5),
            max_retry_backoff: Duration::from_secs(60),
        }
    }
}
