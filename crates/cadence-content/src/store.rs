//! Storage backends for agent documents.
//!
//! Documents are always loaded and saved whole; there is no field-level
//! persistence.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{Agent, ContentError};

/// Load/save boundary for agent content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Load the full document for an agent.
    async fn load(&self, agent_id: &str) -> Result<Agent, ContentError>;

    /// Replace the stored document for an agent.
    async fn save(&self, agent_id: &str, agent: &Agent) -> Result<(), ContentError>;

    /// Identifiers of every stored agent, sorted.
    async fn list_agents(&self) -> Result<Vec<String>, ContentError>;
}

/// On-disk envelope: `{ "agent": { ... } }`.
#[derive(Deserialize)]
struct MasterDocument {
    agent: Agent,
}

#[derive(Serialize)]
struct MasterDocumentRef<'a> {
    agent: &'a Agent,
}

/// Stores each agent as `<root>/<id>/<id>_master.json`.
#[derive(Debug, Clone)]
pub struct JsonFileContentStore {
    root: PathBuf,
}

impl JsonFileContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the master document for an agent.
    pub fn document_path(&self, agent_id: &str) -> PathBuf {
        self.root
            .join(agent_id)
            .join(format!("{}_master.json", agent_id))
    }
}

#[async_trait]
impl ContentStore for JsonFileContentStore {
    async fn load(&self, agent_id: &str) -> Result<Agent, ContentError> {
        let path = self.document_path(agent_id);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ContentError::NotFound(agent_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let document: MasterDocument =
            serde_json::from_str(&text).map_err(|source| ContentError::Malformed {
                agent: agent_id.to_string(),
                source,
            })?;

        debug!(agent = %agent_id, path = %path.display(), "loaded agent document");
        Ok(document.agent)
    }

    async fn save(&self, agent_id: &str, agent: &Agent) -> Result<(), ContentError> {
        let path = self.document_path(agent_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_string_pretty(&MasterDocumentRef { agent })?;

        // Write to a sibling file and rename so a crash never leaves a torn document
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;

        debug!(agent = %agent_id, posted = agent.posted_count(), "saved agent document");
        Ok(())
    }

    async fn list_agents(&self) -> Result<Vec<String>, ContentError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(root = %self.root.display(), "content directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut agents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if fs::try_exists(self.document_path(&name)).await? {
                agents.push(name);
            }
        }

        agents.sort();
        Ok(agents)
    }
}

/// In-memory store, useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    agents: RwLock<HashMap<String, Agent>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an agent under its derived identifier.
    pub async fn insert(&self, agent: Agent) -> String {
        let id = agent.identifier();
        self.agents.write().await.insert(id.clone(), agent);
        id
    }

    /// Current stored copy of an agent.
    pub async fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().await.get(agent_id).cloned()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn load(&self, agent_id: &str) -> Result<Agent, ContentError> {
        self.get(agent_id)
            .await
            .ok_or_else(|| ContentError::NotFound(agent_id.to_string()))
    }

    async fn save(&self, agent_id: &str, agent: &Agent) -> Result<(), ContentError> {
        self.agents
            .write()
            .await
            .insert(agent_id.to_string(), agent.clone());
        Ok(())
    }

    async fn list_agents(&self) -> Result<Vec<String>, ContentError> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Episode, Post, Season};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn agent(name: &str) -> Agent {
        let mut agent = Agent::new(name);
        agent.seasons = vec![Season::new(
            1,
            vec![Episode::new(1, "Pilot", vec![Post::new("p1", 1, "hello")])],
        )];
        agent
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileContentStore::new(dir.path());
        let mut original = agent("Luna Vega");

        store.save("Luna_Vega", &original).await.unwrap();
        assert!(store.document_path("Luna_Vega").exists());
        assert!(!store.document_path("Luna_Vega").with_extension("json.tmp").exists());

        original.seasons[0].episodes[0].posts[0].mark_posted();
        store.save("Luna_Vega", &original).await.unwrap();

        let loaded = store.load("Luna_Vega").await.unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_file_store_writes_envelope() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileContentStore::new(dir.path());
        store.save("A", &agent("A")).await.unwrap();

        let text = std::fs::read_to_string(store.document_path("A")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["agent"]["agent_details"]["name"], "A");
    }

    #[tokio::test]
    async fn test_file_store_missing_agent() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileContentStore::new(dir.path());
        let err = store.load("nobody").await.unwrap_err();
        assert!(matches!(err, ContentError::NotFound(ref id) if id == "nobody"));
    }

    #[tokio::test]
    async fn test_file_store_malformed_document() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileContentStore::new(dir.path());
        let path = store.document_path("broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = store.load("broken").await.unwrap_err();
        assert!(matches!(err, ContentError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_file_store_lists_agents() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileContentStore::new(dir.path());
        store.save("Zed", &agent("Zed")).await.unwrap();
        store.save("Alpha", &agent("Alpha")).await.unwrap();
        std::fs::create_dir_all(dir.path().join("empty_dir")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "x").unwrap();

        assert_eq!(store.list_agents().await.unwrap(), vec!["Alpha", "Zed"]);
    }

    #[tokio::test]
    async fn test_file_store_missing_root_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileContentStore::new(dir.path().join("nope"));
        assert!(store.list_agents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryContentStore::new();
        let id = store.insert(agent("Luna Vega")).await;
        assert_eq!(id, "Luna_Vega");

        let mut loaded = store.load(&id).await.unwrap();
        loaded.seasons[0].episodes[0].posts[0].mark_posted();
        store.save(&id, &loaded).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap().posted_count(), 1);
        assert_eq!(store.list_agents().await.unwrap(), vec!["Luna_Vega"]);
        assert!(matches!(
            store.load("other").await,
            Err(ContentError::NotFound(_))
        ));
    }
}
