//! Where content and scheduler state live on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Result;
use tracing::debug;

use cadence_content::JsonFileContentStore;
use cadence_publisher::Publisher;
use cadence_scheduler::{
    JsonFileKeyValueStore, PostingScheduler, SchedulerConfig, SchedulerStateStore,
};

/// File name of the scheduler state inside the data directory.
const STATE_FILE: &str = "scheduler_state.json";

/// Resolved storage locations.
#[derive(Debug, Clone)]
pub struct Workspace {
    content_dir: PathBuf,
    state_path: PathBuf,
}

impl Workspace {
    /// Resolve paths, defaulting the state file to the user data directory.
    pub fn new(content_dir: PathBuf, state_path: Option<PathBuf>) -> Result<Self> {
        let state_path = match state_path {
            Some(path) => path,
            None => default_state_path()?,
        };
        debug!(
            content_dir = %content_dir.display(),
            state_path = %state_path.display(),
            "resolved workspace"
        );
        Ok(Self {
            content_dir,
            state_path,
        })
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn content_store(&self) -> Arc<JsonFileContentStore> {
        Arc::new(JsonFileContentStore::new(&self.content_dir))
    }

    pub fn state_store(&self) -> SchedulerStateStore {
        SchedulerStateStore::new(Arc::new(JsonFileKeyValueStore::new(&self.state_path)))
    }

    /// Restore a scheduler over this workspace.
    pub async fn open_scheduler(
        &self,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
    ) -> PostingScheduler {
        PostingScheduler::restore(self.content_store(), publisher, self.state_store(), config)
            .await
    }
}

fn default_state_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        miette::miette!("could not determine the data directory; pass --state-path")
    })?;
    Ok(data_dir.join("cadence").join(STATE_FILE))
}
