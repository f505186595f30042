//! The publishing contract.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::{AuthError, PublishError};

/// A successfully published post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    /// Remote identifier of the created post, when the backend returns one.
    pub uri: Option<String>,
}

/// Performs the network side of posting for an agent.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Log in on behalf of an agent. Must succeed before posting starts.
    async fn authenticate(&self, agent_id: &str) -> Result<(), AuthError>;

    /// Publish one post.
    async fn publish(&self, content: &str) -> Result<PublishedPost, PublishError>;
}

/// Shorten post text to at most `max_chars` characters.
///
/// Overlong text keeps its first `max_chars - 3` characters followed by `...`.
pub fn truncate_post(content: &str, max_chars: usize) -> Cow<'_, str> {
    if content.chars().count() <= max_chars {
        return Cow::Borrowed(content);
    }
    let keep = max_chars.saturating_sub(3);
    let mut text: String = content.chars().take(keep).collect();
    text.push_str("...");
    Cow::Owned(text)
}

/// Publisher that only logs what it would have posted.
#[derive(Debug)]
pub struct DryRunPublisher {
    max_chars: usize,
    published: AtomicUsize,
}

impl DryRunPublisher {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            published: AtomicUsize::new(0),
        }
    }
}

impl Default for DryRunPublisher {
    fn default() -> Self {
        Self::new(crate::BLUESKY_MAX_POST_CHARS)
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn authenticate(&self, agent_id: &str) -> Result<(), AuthError> {
        info!(agent = %agent_id, "dry run: skipping login");
        Ok(())
    }

    async fn publish(&self, content: &str) -> Result<PublishedPost, PublishError> {
        if content.trim().is_empty() {
            return Err(PublishError::EmptyContent);
        }
        let text = truncate_post(content, self.max_chars);
        let n = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        info!(n, chars = text.chars().count(), text = %text, "dry run: would publish");
        Ok(PublishedPost { uri: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert!(matches!(truncate_post("hello", 280), Cow::Borrowed("hello")));
        let exact = "a".repeat(280);
        assert_eq!(truncate_post(&exact, 280), exact.as_str());
    }

    #[test]
    fn test_truncate_long_text() {
        let long = "b".repeat(281);
        let out = truncate_post(&long, 280);
        assert_eq!(out.chars().count(), 280);
        assert!(out.ends_with("..."));
        assert_eq!(&out[..277], &long[..277]);
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let out = truncate_post(&text, 6);
        assert_eq!(out, "ééé...");
    }

    #[test]
    fn test_truncate_tiny_limit() {
        assert_eq!(truncate_post("abcdef", 2), "...");
    }

    #[tokio::test]
    async fn test_dry_run_publisher() {
        let publisher = DryRunPublisher::default();
        publisher.authenticate("Luna_Vega").await.unwrap();

        let post = publisher.publish("hello world").await.unwrap();
        assert_eq!(post.uri, None);
        assert_eq!(publisher.published.load(Ordering::Relaxed), 1);

        assert!(matches!(
            publisher.publish("   ").await,
            Err(PublishError::EmptyContent)
        ));
        assert_eq!(publisher.published.load(Ordering::Relaxed), 1);
    }
}
