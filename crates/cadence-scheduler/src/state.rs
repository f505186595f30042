//! Process-global scheduler state on top of a [`KeyValueStore`].

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::{KeyValueStore, SchedulerState, StateStoreError};

/// Key holding the delay in minutes.
pub const DELAY_KEY: &str = "delayBetweenPosts";

/// Key holding the seconds left on the countdown.
pub const TIME_LEFT_KEY: &str = "timeLeft";

/// Key holding whether anything has been posted.
pub const HAS_POSTED_KEY: &str = "hasPosted";

/// Delay used when none is stored.
pub const DEFAULT_DELAY_MINUTES: u32 = 5;

/// A single persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    DelayBetweenPosts(u32),
    TimeLeft(u32),
    HasPosted(bool),
}

impl StateField {
    fn key(self) -> &'static str {
        match self {
            Self::DelayBetweenPosts(_) => DELAY_KEY,
            Self::TimeLeft(_) => TIME_LEFT_KEY,
            Self::HasPosted(_) => HAS_POSTED_KEY,
        }
    }

    fn value(self) -> Value {
        match self {
            Self::DelayBetweenPosts(v) | Self::TimeLeft(v) => Value::from(v),
            Self::HasPosted(v) => Value::Bool(v),
        }
    }
}

/// Loads and writes through the timer state.
///
/// State is shared by every agent in the process.
#[derive(Clone)]
pub struct SchedulerStateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SchedulerStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Restore state, falling back to defaults per field.
    ///
    /// Missing or corrupt values never fail the load.
    pub async fn load(&self) -> SchedulerState {
        let defaults = SchedulerState::default();

        let delay_between_posts = self
            .read(DELAY_KEY, parse_u32)
            .await
            .unwrap_or(defaults.delay_between_posts);
        let time_left = self
            .read(TIME_LEFT_KEY, parse_u32)
            .await
            .unwrap_or(delay_between_posts.saturating_mul(60));
        let has_posted = self
            .read(HAS_POSTED_KEY, parse_bool)
            .await
            .unwrap_or(defaults.has_posted);

        SchedulerState {
            delay_between_posts,
            time_left,
            has_posted,
            is_posting: false,
        }
    }

    /// Write one field through to storage.
    pub async fn save(&self, field: StateField) -> Result<(), StateStoreError> {
        self.kv.set(field.key(), field.value()).await
    }

    async fn read<T>(&self, key: &str, parse: fn(&Value) -> Option<T>) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(value)) => {
                let parsed = parse(&value);
                if parsed.is_none() {
                    warn!(key, value = %value, "ignoring unreadable persisted value");
                }
                parsed
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "failed to read persisted value");
                None
            }
        }
    }
}

/// Accept non-negative integers, stored either as numbers or numeric strings.
fn parse_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
