//! Agent document model.
//!
//! Mirrors the `<id>_master.json` documents written by the content generator.
//! Fields the scheduler does not interpret are kept in `extra` maps so that
//! saving a document never drops data.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A configured persona and its generated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_details: AgentDetails,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub seasons: Vec<Season>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Descriptive details of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDetails {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A season of episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    #[serde(default)]
    pub season_number: i64,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub episodes: Vec<Episode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An episode within a season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub episode_number: i64,
    #[serde(default)]
    pub episode_name: String,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub posts: Vec<Post>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single publishable post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Stable identity across reloads.
    pub post_id: String,
    #[serde(default)]
    pub post_number: i64,
    #[serde(default)]
    pub post_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_highlights: Option<String>,
    #[serde(default)]
    pub post_posted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Agent {
    /// Create an agent with no content.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            agent_details: AgentDetails {
                name: name.into(),
                extra: Map::new(),
            },
            seasons: Vec::new(),
            extra: Map::new(),
        }
    }

    /// The agent's display name.
    pub fn name(&self) -> &str {
        &self.agent_details.name
    }

    /// Storage identifier derived from the display name.
    pub fn identifier(&self) -> String {
        agent_identifier(self.name())
    }

    /// Iterate over every post in document order.
    pub fn posts(&self) -> impl Iterator<Item = &Post> {
        self.seasons
            .iter()
            .flat_map(|s| s.episodes.iter())
            .flat_map(|e| e.posts.iter())
    }

    /// Number of posts marked as published.
    pub fn posted_count(&self) -> usize {
        self.posts().filter(|p| p.post_posted).count()
    }
}

impl Season {
    pub fn new(season_number: i64, episodes: Vec<Episode>) -> Self {
        Self {
            season_number,
            episodes,
            extra: Map::new(),
        }
    }
}

impl Episode {
    pub fn new(episode_number: i64, episode_name: impl Into<String>, posts: Vec<Post>) -> Self {
        Self {
            episode_number,
            episode_name: episode_name.into(),
            posts,
            extra: Map::new(),
        }
    }
}

impl Post {
    /// Create an unposted post.
    pub fn new(post_id: impl Into<String>, post_number: i64, content: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            post_number,
            post_content: content.into(),
            post_highlights: None,
            post_posted: false,
            extra: Map::new(),
        }
    }

    /// Mark this post as published. There is no way back.
    pub fn mark_posted(&mut self) {
        self.post_posted = true;
    }

    /// Status label shown next to the post in a feed.
    pub fn status_label(&self) -> &'static str {
        if self.post_posted {
            "Posted"
        } else {
            "Not Posted"
        }
    }
}

/// Derive the storage identifier for an agent name.
///
/// Spaces become underscores, matching the directory naming of the content
/// generator (`configs/<id>/<id>_master.json`).
pub fn agent_identifier(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Deserialize a collection, treating null, missing or non-array values as empty.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| T::deserialize(item).map_err(D::Error::custom))
            .collect(),
        _ => Ok(Vec::new()),
    }
}
