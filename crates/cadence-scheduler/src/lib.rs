//! Autonomous posting scheduler for Cadence.
//!
//! This crate provides:
//! - A countdown timer driving "post every N minutes"
//! - Durable, process-global scheduler state that survives restarts
//! - A posting loop that publishes unposted content one item at a time
//!   and persists completion after every success

mod error;
mod kv;
mod scheduler;
mod state;
mod timer;
mod types;

pub use error::{SchedulerError, StateStoreError};
pub use kv::{JsonFileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use scheduler::PostingScheduler;
pub use state::{
    DEFAULT_DELAY_MINUTES, DELAY_KEY, HAS_POSTED_KEY, SchedulerStateStore, StateField,
    TIME_LEFT_KEY,
};
pub use timer::{CountdownTimer, Tick, format_countdown};
pub use types::{
    LoopPhase, LoopStart, PostingEvent, RunSummary, SchedulerConfig, SchedulerState,
    SchedulerStatus,
};
