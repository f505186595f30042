//! The posting loop and its command surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use cadence_content::{Agent, ContentStore, PostIndex, PostQueue, QueuedPost};
use cadence_publisher::{PublishError, PublishedPost, Publisher};

use crate::{
    CountdownTimer, LoopPhase, LoopStart, PostingEvent, RunSummary, SchedulerConfig,
    SchedulerError, SchedulerState, SchedulerStateStore, SchedulerStatus, StateField, Tick,
};

/// Capacity of the event channel. Slow subscribers miss old events.
const EVENT_CAPACITY: usize = 256;

/// Drives publishing of an agent's unposted content.
///
/// Cheap to clone; clones share the same loop.
#[derive(Clone)]
pub struct PostingScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    content: Arc<dyn ContentStore>,
    publisher: Arc<dyn Publisher>,
    state_store: SchedulerStateStore,
    config: SchedulerConfig,
    core: Mutex<Core>,
    // Single writer for agent documents
    writer: Mutex<()>,
    // Serializes start_loop calls
    start_gate: Mutex<()>,
    stop_tx: watch::Sender<bool>,
    // True from start_loop until the posting task has finished. Only
    // changed while `core` is locked.
    run_active: watch::Sender<bool>,
    events: broadcast::Sender<PostingEvent>,
    run_handle: Mutex<Option<JoinHandle<RunSummary>>>,
}

struct Core {
    phase: LoopPhase,
    agent_id: Option<String>,
    agent: Option<Agent>,
    delay: u32,
    has_posted: bool,
    timer: CountdownTimer,
    logged_in: bool,
    content_unsynced: bool,
}

impl Core {
    fn snapshot(&self) -> SchedulerState {
        SchedulerState {
            delay_between_posts: self.delay,
            time_left: self.timer.time_left(),
            has_posted: self.has_posted,
            is_posting: self.phase.is_posting(),
        }
    }
}

impl PostingScheduler {
    /// Create a scheduler, resuming the persisted timer state.
    pub async fn restore(
        content: Arc<dyn ContentStore>,
        publisher: Arc<dyn Publisher>,
        state_store: SchedulerStateStore,
        config: SchedulerConfig,
    ) -> Self {
        let state = state_store.load().await;
        let timer = CountdownTimer::restore(Some(state.time_left), state.delay_between_posts);

        info!(
            delay_minutes = state.delay_between_posts,
            time_left = timer.time_left(),
            has_posted = state.has_posted,
            "restored scheduler state"
        );

        let (stop_tx, _) = watch::channel(false);
        let (run_active, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                content,
                publisher,
                state_store,
                config,
                core: Mutex::new(Core {
                    phase: LoopPhase::Idle,
                    agent_id: None,
                    agent: None,
                    delay: state.delay_between_posts,
                    has_posted: state.has_posted,
                    timer,
                    logged_in: false,
                    content_unsynced: false,
                }),
                writer: Mutex::new(()),
                start_gate: Mutex::new(()),
                stop_tx,
                run_active,
                events,
                run_handle: Mutex::new(None),
            }),
        }
    }

    /// Load an agent and make it the active one.
    ///
    /// Returns the number of unposted items.
    #[tracing::instrument(skip(self))]
    pub async fn select_agent(&self, agent_id: &str) -> Result<usize, SchedulerError> {
        self.ensure_not_busy(agent_id).await?;

        let _writer = self.inner.writer.lock().await;

        // Reselecting an agent whose last save failed retries that save first,
        // so reloading never forgets published posts.
        {
            let core = self.inner.core.lock().await;
            if core.content_unsynced && core.agent_id.as_deref() == Some(agent_id) {
                if let Some(agent) = core.agent.clone() {
                    drop(core);
                    self.inner
                        .content
                        .save(agent_id, &agent)
                        .await
                        .map_err(SchedulerError::Persistence)?;
                    self.inner.core.lock().await.content_unsynced = false;
                    info!(agent = %agent_id, "saved previously unsynced content");
                }
            }
        }

        let agent = self.inner.content.load(agent_id).await?;
        let unposted = PostQueue::build(&agent).unposted_count();

        let mut core = self.inner.core.lock().await;
        if self.inner.is_busy(&core) {
            return Err(SchedulerError::AgentSwitchWhilePosting {
                current: core.agent_id.clone().unwrap_or_default(),
                requested: agent_id.to_string(),
            });
        }

        if core.agent_id.as_deref() != Some(agent_id) {
            core.logged_in = false;
            core.content_unsynced = false;
        }
        core.agent_id = Some(agent_id.to_string());
        core.agent = Some(agent);
        core.phase = LoopPhase::Ready;

        info!(agent = %agent_id, unposted, "selected agent");
        Ok(unposted)
    }

    /// Log in to the publisher for the selected agent.
    #[tracing::instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<(), SchedulerError> {
        let agent_id = self
            .inner
            .core
            .lock()
            .await
            .agent_id
            .clone()
            .ok_or(SchedulerError::NoAgentSelected)?;

        if let Err(e) = self.inner.publisher.authenticate(&agent_id).await {
            warn!(agent = %agent_id, error = %e, "login failed");
            return Err(e.into());
        }

        let mut core = self.inner.core.lock().await;
        if core.agent_id.as_deref() == Some(agent_id.as_str()) {
            core.logged_in = true;
        }
        Ok(())
    }

    /// Change the delay between posts.
    ///
    /// The new value is applied in memory even when persisting it fails.
    #[tracing::instrument(skip(self))]
    pub async fn set_delay(&self, minutes: u32) -> Result<(), SchedulerError> {
        let (changed, time_left) = {
            let mut core = self.inner.core.lock().await;
            core.delay = minutes;
            let has_posted = core.has_posted;
            let changed = core.timer.reconfigure(minutes, has_posted);
            (changed, core.timer.time_left())
        };

        info!(minutes, time_left, "delay updated");

        self.inner
            .state_store
            .save(StateField::DelayBetweenPosts(minutes))
            .await?;
        if changed {
            self.inner
                .state_store
                .save(StateField::TimeLeft(time_left))
                .await?;
        }
        Ok(())
    }

    /// Start publishing the selected agent's unposted content.
    #[tracing::instrument(skip(self))]
    pub async fn start_loop(&self) -> Result<LoopStart, SchedulerError> {
        let _gate = self.inner.start_gate.lock().await;

        let (agent_id, logged_in) = {
            let core = self.inner.core.lock().await;
            match core.phase {
                LoopPhase::Idle => return Err(SchedulerError::NoAgentSelected),
                LoopPhase::Posting => return Err(SchedulerError::AlreadyPosting),
                LoopPhase::Ready | LoopPhase::Stopped => {}
            }
            let agent = core.agent.as_ref().ok_or(SchedulerError::NoAgentSelected)?;
            if PostQueue::build(agent).unposted_count() == 0 {
                info!("nothing to post");
                return Ok(LoopStart::NothingToPost);
            }
            (core.agent_id.clone().unwrap_or_default(), core.logged_in)
        };

        if !logged_in {
            self.authenticate().await?;
        }

        // A stopped run may still be finishing its last publish
        self.join_run().await;

        let mut core = self.inner.core.lock().await;
        if self.inner.is_busy(&core) {
            return Err(SchedulerError::AlreadyPosting);
        }
        if core.agent_id.as_deref() != Some(agent_id.as_str()) {
            return Err(SchedulerError::NoAgentSelected);
        }
        let Some(agent) = core.agent.as_ref() else {
            return Err(SchedulerError::NoAgentSelected);
        };

        let queue = PostQueue::build(agent).into_unposted();
        if queue.is_empty() {
            return Ok(LoopStart::NothingToPost);
        }
        let index = PostIndex::build(agent);
        let queued = queue.len();

        core.phase = LoopPhase::Posting;
        self.inner.run_active.send_replace(true);
        self.inner.stop_tx.send_replace(false);
        let stop_rx = self.inner.stop_tx.subscribe();
        drop(core);

        info!(agent = %agent_id, queued, "posting loop started");

        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.run(agent_id, queue, index, stop_rx));
        *self.inner.run_handle.lock().await = Some(handle);

        Ok(LoopStart::Started { queued })
    }

    /// Ask the running loop to stop.
    ///
    /// An in-flight publish completes; nothing further is dequeued. Returns
    /// whether a run was signalled.
    #[tracing::instrument(skip(self))]
    pub async fn stop_loop(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        if !core.phase.is_posting() {
            return false;
        }
        core.phase = LoopPhase::Stopped;
        self.inner.stop_tx.send_replace(true);
        info!("posting loop stop requested");
        true
    }

    /// Wait for the current run, if any, to finish.
    pub async fn wait_for_run(&self) -> Option<RunSummary> {
        self.join_run().await
    }

    /// Replace a post's content and persist the document.
    #[tracing::instrument(skip(self, content))]
    pub async fn edit_post(&self, post_id: &str, content: &str) -> Result<(), SchedulerError> {
        let _writer = self.inner.writer.lock().await;

        let (agent_id, snapshot) = {
            let mut core = self.inner.core.lock().await;
            let agent_id = core.agent_id.clone().ok_or(SchedulerError::NoAgentSelected)?;
            let agent = core.agent.as_mut().ok_or(SchedulerError::NoAgentSelected)?;
            let index = PostIndex::build(agent);
            let post = index
                .post_mut(agent, post_id)
                .ok_or_else(|| SchedulerError::PostNotFound(post_id.to_string()))?;
            post.post_content = content.to_string();
            (agent_id, agent.clone())
        };

        let result = self.inner.content.save(&agent_id, &snapshot).await;
        let mut core = self.inner.core.lock().await;
        match result {
            Ok(()) => {
                core.content_unsynced = false;
                info!(agent = %agent_id, post_id, "post edited");
                Ok(())
            }
            Err(e) => {
                core.content_unsynced = true;
                Err(SchedulerError::Persistence(e))
            }
        }
    }

    /// Advance the countdown by one second.
    ///
    /// The clock only runs once something has been posted. Expiry re-arms
    /// with the current delay. Returns `None` while the clock is idle.
    pub async fn tick(&self) -> Option<Tick> {
        let (tick, time_left) = {
            let mut core = self.inner.core.lock().await;
            if !core.has_posted {
                return None;
            }
            let tick = core.timer.tick();
            if tick == Tick::Expired {
                let delay = core.delay;
                core.timer.rearm(delay);
                debug!(delay_minutes = delay, "countdown expired, re-armed");
            }
            (tick, core.timer.time_left())
        };

        self.inner.persist(StateField::TimeLeft(time_left)).await;
        Some(tick)
    }

    /// Run [`tick`](Self::tick) every second until shutdown.
    pub fn spawn_ticker(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut clock = interval(Duration::from_secs(1));
            clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            clock.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("countdown ticker shutting down");
                            break;
                        }
                    }
                    _ = clock.tick() => {
                        scheduler.tick().await;
                    }
                }
            }
        })
    }

    /// Current state for display.
    pub async fn status(&self) -> SchedulerStatus {
        let core = self.inner.core.lock().await;
        SchedulerStatus {
            phase: core.phase,
            agent: core.agent_id.clone(),
            state: core.snapshot(),
            unposted_count: core
                .agent
                .as_ref()
                .map(|a| PostQueue::build(a).unposted_count())
                .unwrap_or(0),
            logged_in: core.logged_in,
            content_unsynced: core.content_unsynced,
        }
    }

    /// Ordered posts of the selected agent.
    pub async fn queue(&self) -> Result<PostQueue, SchedulerError> {
        let core = self.inner.core.lock().await;
        core.agent
            .as_ref()
            .map(PostQueue::build)
            .ok_or(SchedulerError::NoAgentSelected)
    }

    /// Copy of the selected agent as currently held in memory.
    pub async fn agent(&self) -> Option<Agent> {
        self.inner.core.lock().await.agent.clone()
    }

    /// Receive progress events from future runs.
    pub fn subscribe(&self) -> broadcast::Receiver<PostingEvent> {
        self.inner.events.subscribe()
    }

    async fn ensure_not_busy(&self, requested: &str) -> Result<(), SchedulerError> {
        let core = self.inner.core.lock().await;
        if self.inner.is_busy(&core) {
            return Err(SchedulerError::AgentSwitchWhilePosting {
                current: core.agent_id.clone().unwrap_or_default(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }

    async fn join_run(&self) -> Option<RunSummary> {
        let handle = self.inner.run_handle.lock().await.take();
        let summary = match handle {
            Some(handle) => match handle.await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    error!(error = %e, "posting task failed");
                    let mut core = self.inner.core.lock().await;
                    if core.phase.is_posting() {
                        core.phase = LoopPhase::Ready;
                    }
                    self.inner.run_active.send_replace(false);
                    None
                }
            },
            None => None,
        };

        // Another caller may be holding the handle
        let mut active = self.inner.run_active.subscribe();
        loop {
            let running = *active.borrow_and_update();
            if !running || active.changed().await.is_err() {
                break;
            }
        }
        summary
    }
}

impl Inner {
    /// A run is posting, or stopped but still finishing its last publish.
    fn is_busy(&self, core: &Core) -> bool {
        core.phase.is_posting() || *self.run_active.borrow()
    }

    async fn run(
        self: Arc<Self>,
        agent_id: String,
        queue: Vec<QueuedPost>,
        index: PostIndex,
        mut stop_rx: watch::Receiver<bool>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut attempted = false;

        for item in queue {
            if *stop_rx.borrow_and_update() {
                break;
            }

            let post_id = item.post.post_id.clone();
            let label = item.to_string();

            // Content may have been edited or posted since the queue was built
            let content = {
                let core = self.core.lock().await;
                core.agent
                    .as_ref()
                    .filter(|_| core.agent_id.as_deref() == Some(agent_id.as_str()))
                    .and_then(|agent| index.post(agent, &post_id))
                    .filter(|post| !post.post_posted)
                    .map(|post| post.post_content.clone())
            };
            let Some(content) = content else {
                debug!(post_id = %post_id, "skipping already posted item");
                summary.skipped += 1;
                self.emit(PostingEvent::Skipped { post_id });
                continue;
            };

            if attempted && !self.wait_between_posts(&mut stop_rx).await {
                break;
            }
            attempted = true;

            match self.publish_with_policy(&content).await {
                Ok(published) => {
                    info!(agent = %agent_id, post_id = %post_id, label = %label, "published post");
                    self.record_success(&agent_id, &index, &post_id).await;
                    summary.published += 1;
                    self.emit(PostingEvent::Published {
                        post_id,
                        label,
                        uri: published.uri,
                    });
                }
                Err(e) => {
                    warn!(agent = %agent_id, post_id = %post_id, error = %e, "failed to publish post");
                    summary.failed += 1;
                    self.emit(PostingEvent::PublishFailed {
                        post_id,
                        label,
                        error: e.to_string(),
                        needs_credentials: e.is_credentials(),
                    });
                }
            }
        }

        {
            let mut core = self.core.lock().await;
            summary.stopped = core.phase == LoopPhase::Stopped;
            if core.phase.is_posting() {
                core.phase = LoopPhase::Ready;
            }
            self.run_active.send_replace(false);
        }

        info!(
            agent = %agent_id,
            published = summary.published,
            failed = summary.failed,
            skipped = summary.skipped,
            stopped = summary.stopped,
            "posting loop finished"
        );
        self.emit(PostingEvent::RunFinished(summary));
        summary
    }

    /// Sleep for the configured delay. Returns false when stopped first.
    async fn wait_between_posts(&self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        let delay = self.core.lock().await.delay;
        let wait = Duration::from_secs(u64::from(delay) * 60);
        self.emit(PostingEvent::Waiting {
            seconds: wait.as_secs(),
        });
        debug!(seconds = wait.as_secs(), "waiting before next post");

        tokio::select! {
            _ = sleep(wait) => !*stop_rx.borrow(),
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    return false;
                }
                !*stop_rx.borrow()
            }
        }
    }

    async fn publish_with_policy(&self, content: &str) -> Result<PublishedPost, PublishError> {
        let mut attempt = 1;
        loop {
            let result = match timeout(self.config.publish_timeout, self.publisher.publish(content))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(PublishError::TimedOut(self.config.publish_timeout)),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.config.max_publish_attempts => {
                    let pause = match &e {
                        PublishError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs).min(self.config.max_retry_backoff),
                        _ => self.config.retry_backoff,
                    };
                    warn!(attempt, error = %e, pause_secs = pause.as_secs(), "publish failed, retrying");
                    sleep(pause).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Mark, save, then re-arm. Failures are reported, never fatal.
    async fn record_success(&self, agent_id: &str, index: &PostIndex, post_id: &str) {
        let _writer = self.writer.lock().await;

        let snapshot = {
            let mut core = self.core.lock().await;
            if core.agent_id.as_deref() == Some(agent_id) {
                core.agent.as_mut().map(|agent| {
                    index.mark_posted(agent, post_id);
                    agent.clone()
                })
            } else {
                error!(agent = %agent_id, post_id, "selected agent changed during run, not saving");
                None
            }
        };

        if let Some(agent) = snapshot {
            let result = self.content.save(agent_id, &agent).await;
            let mut core = self.core.lock().await;
            match result {
                Ok(()) => core.content_unsynced = false,
                Err(e) => {
                    error!(agent = %agent_id, post_id, error = %e, "failed to save posted status");
                    core.content_unsynced = true;
                    self.emit(PostingEvent::PersistenceFailed {
                        post_id: post_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let (first_post, time_left) = {
            let mut core = self.core.lock().await;
            let first_post = !core.has_posted;
            core.has_posted = true;
            let delay = core.delay;
            core.timer.rearm(delay);
            (first_post, core.timer.time_left())
        };

        if first_post {
            self.persist(StateField::HasPosted(true)).await;
        }
        self.persist(StateField::TimeLeft(time_left)).await;
    }

    async fn persist(&self, field: StateField) {
        if let Err(e) = self.state_store.save(field).await {
            warn!(?field, error = %e, "failed to persist scheduler state");
        }
    }

    fn emit(&self, event: PostingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKeyValueStore;
    use cadence_content::{Episode, MemoryContentStore, Post, Season};
    use cadence_publisher::DryRunPublisher;
    use pretty_assertions::assert_eq;

    async fn scheduler_with(agent: Option<Agent>) -> (PostingScheduler, Arc<MemoryContentStore>) {
        let content = Arc::new(MemoryContentStore::new());
        if let Some(agent) = agent {
            content.insert(agent).await;
        }
        let state_store = SchedulerStateStore::new(Arc::new(MemoryKeyValueStore::new()));
        let scheduler = PostingScheduler::restore(
            content.clone(),
            Arc::new(DryRunPublisher::default()),
            state_store,
            SchedulerConfig::default(),
        )
        .await;
        (scheduler, content)
    }

    fn agent() -> Agent {
        let mut agent = Agent::new("Luna Vega");
        agent.seasons = vec![Season::new(
            1,
            vec![Episode::new(
                1,
                "Pilot",
                vec![Post::new("p1", 1, "one"), Post::new("p2", 2, "two")],
            )],
        )];
        agent
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let (scheduler, _) = scheduler_with(None).await;
        let status = scheduler.status().await;
        assert_eq!(status.phase, LoopPhase::Idle);
        assert_eq!(status.agent, None);
        assert_eq!(status.state, SchedulerState::default());
    }

    #[tokio::test]
    async fn test_commands_need_agent() {
        let (scheduler, _) = scheduler_with(None).await;
        assert!(matches!(
            scheduler.start_loop().await,
            Err(SchedulerError::NoAgentSelected)
        ));
        assert!(matches!(
            scheduler.authenticate().await,
            Err(SchedulerError::NoAgentSelected)
        ));
        assert!(matches!(
            scheduler.queue().await,
            Err(SchedulerError::NoAgentSelected)
        ));
        assert!(!scheduler.stop_loop().await);
    }

    #[tokio::test]
    async fn test_select_missing_agent_keeps_state() {
        let (scheduler, _) = scheduler_with(None).await;
        let err = scheduler.select_agent("ghost").await.unwrap_err();
        assert!(matches!(err, SchedulerError::ContentLoad(_)));
        assert_eq!(scheduler.status().await.phase, LoopPhase::Idle);
    }

    #[tokio::test]
    async fn test_select_agent_becomes_ready() {
        let (scheduler, _) = scheduler_with(Some(agent())).await;
        assert_eq!(scheduler.select_agent("Luna_Vega").await.unwrap(), 2);

        let status = scheduler.status().await;
        assert_eq!(status.phase, LoopPhase::Ready);
        assert_eq!(status.agent.as_deref(), Some("Luna_Vega"));
        assert_eq!(status.unposted_count, 2);
        assert!(!status.logged_in);
    }

    #[tokio::test]
    async fn test_authenticate_is_remembered() {
        let (scheduler, _) = scheduler_with(Some(agent())).await;
        scheduler.select_agent("Luna_Vega").await.unwrap();
        scheduler.authenticate().await.unwrap();
        assert!(scheduler.status().await.logged_in);

        // Reselecting the same agent keeps the session
        scheduler.select_agent("Luna_Vega").await.unwrap();
        assert!(scheduler.status().await.logged_in);
    }

    #[tokio::test]
    async fn test_edit_post_persists() {
        let (scheduler, content) = scheduler_with(Some(agent())).await;
        scheduler.select_agent("Luna_Vega").await.unwrap();

        scheduler.edit_post("p2", "two, revised").await.unwrap();
        let stored = content.get("Luna_Vega").await.unwrap();
        assert_eq!(stored.seasons[0].episodes[0].posts[1].post_content, "two, revised");

        assert!(matches!(
            scheduler.edit_post("nope", "x").await,
            Err(SchedulerError::PostNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_delay_before_posting_resets_countdown() {
        let (scheduler, _) = scheduler_with(None).await;
        scheduler.set_delay(10).await.unwrap();
        let state = scheduler.status().await.state;
        assert_eq!(state.delay_between_posts, 10);
        assert_eq!(state.time_left, 600);
    }

    #[tokio::test]
    async fn test_tick_idle_until_first_post() {
        let (scheduler, _) = scheduler_with(None).await;
        assert_eq!(scheduler.tick().await, None);
        assert_eq!(scheduler.status().await.state.time_left, 300);
    }
}
