//! Agent content for Cadence.
//!
//! This crate provides:
//! - The season → episode → post document model
//! - A flattened, deterministically ordered post queue
//! - An identity map for locating posts by `post_id`
//! - Storage backends for loading and saving whole agent documents

mod error;
mod model;
mod queue;
mod store;

pub use error::ContentError;
pub use model::{Agent, AgentDetails, Episode, Post, Season, agent_identifier};
pub use queue::{PostIndex, PostLocation, PostQueue, QueuedPost};
pub use store::{ContentStore, JsonFileContentStore, MemoryContentStore};
