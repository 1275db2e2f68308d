//! Message types for actor communication
//!
//! Commands travel to a collector over its mpsc channel, replies come back
//! over oneshot channels and the job status is published on a watch channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::Snapshot;
use crate::monitors::ProbeError;
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Commands that can be sent to a CollectorActor
#[derive(Debug)]
pub enum CollectorCommand {
    /// Run a collection right away, speed test included
    ///
    /// Rejected with `CollectError::AlreadyRunning` while a run is in flight.
    CollectNow {
        respond_to: oneshot::Sender<Result<Snapshot, CollectError>>,
    },

    /// Resume scheduled collection (`Disabled → Idle`)
    Start,

    /// Pause scheduled collection; an in-flight run still completes
    Stop,

    /// Update the collection interval, effective from the next tick
    UpdateInterval { interval_secs: u64 },

    /// Finish the in-flight run, if any, and exit
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    /// Waiting out the backoff after a failed run
    Failed,
    Disabled,
}

/// Published by every collector after each state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub entity_id: String,
    pub state: JobState,
    pub interval_secs: u64,
    pub last_collection: Option<DateTime<Utc>>,
    pub next_collection: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Ticks that arrived while the job was not idle
    pub dropped_ticks: u64,
    /// Completed runs, successful or not
    pub runs: u64,
}

impl JobStatus {
    pub fn new(entity_id: impl Into<String>, interval_secs: u64, enabled: bool) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: if enabled {
                JobState::Idle
            } else {
                JobState::Disabled
            },
            interval_secs,
            last_collection: None,
            next_collection: None,
            last_error: None,
            consecutive_failures: 0,
            dropped_ticks: 0,
            runs: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != JobState::Disabled
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("a collection is already running for {0}")]
    AlreadyRunning(String),

    #[error("no collection job for entity {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Store(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("collector is not running")]
    ActorStopped,

    #[error("collection task aborted: {0}")]
    Aborted(String),
}
