//! Flattening nested agent content into an ordered post queue.

use std::collections::HashMap;
use std::fmt;

use crate::{Agent, Post};

/// A post annotated with its position in the season/episode hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedPost {
    pub season_number: i64,
    pub episode_number: i64,
    pub episode_name: String,
    pub post: Post,
}

impl QueuedPost {
    /// Sort key: season, then episode, then post number.
    fn order_key(&self) -> (i64, i64, i64) {
        (self.season_number, self.episode_number, self.post.post_number)
    }
}

impl fmt::Display for QueuedPost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Season {}, Episode {} • Post {}",
            self.season_number, self.episode_number, self.post.post_number
        )
    }
}

/// Every post of an agent in publishing order.
///
/// The queue is a snapshot: rebuild it whenever the agent may have changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostQueue {
    entries: Vec<QueuedPost>,
}

impl PostQueue {
    /// Flatten and order an agent's posts.
    ///
    /// Ordering is by `(season_number, episode_number, post_number)` ascending.
    /// The sort is stable, so ties keep their document order.
    pub fn build(agent: &Agent) -> Self {
        let mut entries: Vec<QueuedPost> = agent
            .seasons
            .iter()
            .flat_map(|season| {
                season.episodes.iter().flat_map(move |episode| {
                    episode.posts.iter().map(move |post| QueuedPost {
                        season_number: season.season_number,
                        episode_number: episode.episode_number,
                        episode_name: episode.episode_name.clone(),
                        post: post.clone(),
                    })
                })
            })
            .collect();

        entries.sort_by_key(QueuedPost::order_key);
        Self { entries }
    }

    /// All posts, posted or not.
    pub fn entries(&self) -> &[QueuedPost] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Posts still waiting to be published, in order.
    pub fn unposted(&self) -> Vec<&QueuedPost> {
        self.entries.iter().filter(|q| !q.post.post_posted).collect()
    }

    /// Number of posts still waiting to be published.
    pub fn unposted_count(&self) -> usize {
        self.entries.iter().filter(|q| !q.post.post_posted).count()
    }

    /// Consume the queue, keeping only unposted entries.
    pub fn into_unposted(self) -> Vec<QueuedPost> {
        self.entries
            .into_iter()
            .filter(|q| !q.post.post_posted)
            .collect()
    }
}

/// Position of a post inside an agent's nested collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostLocation {
    pub season: usize,
    pub episode: usize,
    pub post: usize,
}

/// Identity map from `post_id` to every location holding that id.
///
/// Built once per posting run so marking a post does not re-walk the
/// hierarchy. Lookups check the id at each stored location, so a stale
/// index never touches a different post.
#[derive(Debug, Clone, Default)]
pub struct PostIndex {
    locations: HashMap<String, Vec<PostLocation>>,
}

impl PostIndex {
    pub fn build(agent: &Agent) -> Self {
        let mut locations: HashMap<String, Vec<PostLocation>> = HashMap::new();
        for (s, season) in agent.seasons.iter().enumerate() {
            for (e, episode) in season.episodes.iter().enumerate() {
                for (p, post) in episode.posts.iter().enumerate() {
                    locations
                        .entry(post.post_id.clone())
                        .or_default()
                        .push(PostLocation {
                            season: s,
                            episode: e,
                            post: p,
                        });
                }
            }
        }
        Self { locations }
    }

    /// Look up the first post with the given id.
    ///
    /// Locations that no longer hold `post_id` are ignored.
    pub fn post<'a>(&self, agent: &'a Agent, post_id: &str) -> Option<&'a Post> {
        self.locations
            .get(post_id)?
            .iter()
            .find_map(|loc| locate(agent, loc).filter(|post| post.post_id == post_id))
    }

    /// Look up the first post with the given id for mutation.
    pub fn post_mut<'a>(&self, agent: &'a mut Agent, post_id: &str) -> Option<&'a mut Post> {
        let loc = self
            .locations
            .get(post_id)?
            .iter()
            .find(|loc| matches!(locate(&*agent, loc), Some(post) if post.post_id == post_id))?;
        agent
            .seasons
            .get_mut(loc.season)?
            .episodes
            .get_mut(loc.episode)?
            .posts
            .get_mut(loc.post)
    }

    /// Mark every post carrying `post_id` as posted.
    ///
    /// Returns the number of posts that changed state.
    pub fn mark_posted(&self, agent: &mut Agent, post_id: &str) -> usize {
        let Some(locations) = self.locations.get(post_id) else {
            return 0;
        };

        let mut changed = 0;
        for loc in locations {
            let post = agent
                .seasons
                .get_mut(loc.season)
                .and_then(|s| s.episodes.get_mut(loc.episode))
                .and_then(|e| e.posts.get_mut(loc.post))
                .filter(|post| post.post_id == post_id);
            if let Some(post) = post {
                if !post.post_posted {
                    post.mark_posted();
                    changed += 1;
                }
            }
        }
        changed
    }
}

fn locate<'a>(agent: &'a Agent, loc: &PostLocation) -> Option<&'a Post> {
    agent
        .seasons
        .get(loc.season)?
        .episodes
        .get(loc.episode)?
        .posts
        .get(loc.post)
}
