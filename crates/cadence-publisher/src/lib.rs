//! Publishing backends for Cadence.
//!
//! A [`Publisher`] authenticates an agent and publishes post text. Two
//! implementations are provided:
//! - [`BlueskyPublisher`]: posts to a Bluesky PDS over XRPC
//! - [`DryRunPublisher`]: logs posts without sending them

mod bluesky;
mod error;
mod publisher;

pub use bluesky::{BLUESKY_MAX_POST_CHARS, BlueskyPublisher, Credentials, DEFAULT_PDS_URL};
pub use error::{AuthError, PublishError};
pub use publisher::{DryRunPublisher, PublishedPost, Publisher, truncate_post};
