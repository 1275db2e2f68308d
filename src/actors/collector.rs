//! CollectorActor - runs the recurring collection job of one entity
//!
//! ## State machine
//!
//! ```text
//!            tick / collect_now            success
//!   Idle ───────────────────────► Running ─────────► Idle
//!    ▲                               │
//!    │ backoff elapsed               │ failure
//!    └────────────────────────── Failed
//!
//!   Idle / Running / Failed ── stop ──► Disabled ── start ──► Idle
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Probe → Assembler → Store.append → status update (watch)
//!     ↑
//!     └─── Commands (CollectNow, Start, Stop, UpdateInterval, Shutdown)
//! ```
//!
//! A run is a spawned task tracked in a `JoinSet`, so the actor keeps
//! answering commands while the probe is waiting on the network. At most one
//! run is in flight; ticks that arrive while the job is not idle are dropped
//! and counted, never queued. Stopping only prevents future ticks: an
//! in-flight run always finishes its write.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at, sleep_until};
use tracing::{debug, info, instrument, trace, warn};

use crate::Snapshot;
use crate::monitors::{CollectRequest, Probe, SnapshotAssembler};
use crate::registry::{EntityRegistry, EntityStatus};
use crate::storage::{EntityScope, SnapshotStore};

use super::messages::{CollectError, CollectorCommand, JobState, JobStatus};

/// Shared services every collector writes through
#[derive(Clone)]
pub struct CollectorDeps {
    pub assembler: Arc<SnapshotAssembler>,
    pub store: Arc<dyn SnapshotStore>,
    pub registry: Arc<dyn EntityRegistry>,
}

/// Timing knobs of a collection job
#[derive(Debug, Clone, Copy)]
pub struct CollectorSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
    /// Scheduled runs include a speed test every N runs, 0 disables it
    pub speed_test_every: u32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            max_backoff: Duration::from_secs(900),
            speed_test_every: 4,
        }
    }
}

/// `interval × 2^(failures-1)`, capped at `max`.
pub fn backoff_delay(interval: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1u32
        .checked_shl(failures.saturating_sub(1))
        .unwrap_or(u32::MAX);
    interval.saturating_mul(factor).min(max)
}

type Responder = oneshot::Sender<Result<Snapshot, CollectError>>;

struct RunOutcome {
    result: Result<Snapshot, CollectError>,
    respond_to: Option<Responder>,
}

/// Everything a spawned run needs, detached from the actor
#[derive(Clone)]
struct RunContext {
    entity_id: String,
    probe: Arc<dyn Probe>,
    deps: CollectorDeps,
}

impl RunContext {
    async fn collect(self, request: CollectRequest) -> Result<Snapshot, CollectError> {
        let RunContext {
            entity_id,
            probe,
            deps,
        } = self;

        if !deps.assembler.knows(&entity_id) {
            let latest = deps
                .store
                .latest(&EntityScope::entity(entity_id.as_str()), 1)
                .await?;
            if let Some(previous) = latest.first() {
                deps.assembler.prime(&entity_id, previous.timestamp);
            }
        }

        let measurements = probe.collect(request).await?;
        let snapshot = deps.assembler.assemble(&entity_id, measurements);
        deps.store.append(&snapshot).await?;

        trace!(entity = %entity_id, timestamp = %snapshot.timestamp, "snapshot written");
        Ok(snapshot)
    }
}

/// Actor owning the collection job of a single entity
pub struct CollectorActor {
    context: RunContext,
    settings: CollectorSettings,
    command_rx: mpsc::Receiver<CollectorCommand>,
    status_tx: watch::Sender<JobStatus>,
    status: JobStatus,
    runs: JoinSet<RunOutcome>,
    enabled: bool,
    retry_at: Option<Instant>,
    next_tick: Option<DateTime<Utc>>,
    scheduled_runs: u64,
}

impl CollectorActor {
    fn new(
        context: RunContext,
        settings: CollectorSettings,
        enabled: bool,
        command_rx: mpsc::Receiver<CollectorCommand>,
        status_tx: watch::Sender<JobStatus>,
    ) -> Self {
        let status = status_tx.borrow().clone();
        Self {
            context,
            settings,
            command_rx,
            status_tx,
            status,
            runs: JoinSet::new(),
            enabled,
            retry_at: None,
            next_tick: None,
            scheduled_runs: 0,
        }
    }

    fn ticker(&self, immediately: bool) -> Interval {
        let mut ticker = if immediately {
            interval(self.settings.interval)
        } else {
            interval_at(Instant::now() + self.settings.interval, self.settings.interval)
        };
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Run the actor's main loop until shutdown or until every handle is gone
    #[instrument(skip(self), fields(entity = %self.context.entity_id))]
    pub async fn run(mut self) {
        debug!("starting collector actor");

        let mut ticker = self.ticker(true);
        self.publish();

        loop {
            let retry_at = self.retry_at;

            tokio::select! {
                _ = ticker.tick() => {
                    self.next_tick = Some(Utc::now() + self.settings.interval);
                    self.on_tick();
                }

                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    if self.runs.is_empty() {
                        debug!("backoff elapsed, retrying");
                        ticker.reset();
                        self.next_tick = Some(Utc::now() + self.settings.interval);
                        self.start_scheduled_run();
                    } else {
                        self.status.dropped_ticks += 1;
                        trace!(dropped = self.status.dropped_ticks, "retry dropped, a run is in flight");
                    }
                }

                Some(joined) = self.runs.join_next(), if !self.runs.is_empty() => {
                    self.on_run_finished(joined).await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        CollectorCommand::CollectNow { respond_to } => self.collect_now(respond_to),

                        CollectorCommand::Start => {
                            if !self.enabled {
                                info!("monitoring started");
                                self.enabled = true;
                                ticker.reset_immediately();
                            }
                        }

                        CollectorCommand::Stop => {
                            if self.enabled {
                                info!("monitoring stopped");
                                self.enabled = false;
                                self.retry_at = None;
                                self.next_tick = None;
                            }
                        }

                        CollectorCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.settings.interval = Duration::from_secs(interval_secs.max(1));
                            self.status.interval_secs = self.settings.interval.as_secs();
                            ticker = self.ticker(false);
                            self.next_tick = Some(Utc::now() + self.settings.interval);
                        }

                        CollectorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }

            self.publish();
        }

        // never abort an in-flight write
        while let Some(joined) = self.runs.join_next().await {
            self.on_run_finished(joined).await;
        }
        self.enabled = false;
        self.publish();

        debug!("collector actor stopped");
    }

    fn state(&self) -> JobState {
        if !self.enabled {
            JobState::Disabled
        } else if !self.runs.is_empty() {
            JobState::Running
        } else if self.retry_at.is_some() {
            JobState::Failed
        } else {
            JobState::Idle
        }
    }

    fn publish(&mut self) {
        self.status.state = self.state();
        self.status.next_collection = match self.status.state {
            JobState::Disabled => None,
            JobState::Failed => self.retry_at.map(|at| {
                let wait = at.saturating_duration_since(Instant::now());
                Utc::now() + wait
            }),
            _ => self.next_tick,
        };
        self.status_tx.send_replace(self.status.clone());
    }

    fn on_tick(&mut self) {
        match self.state() {
            JobState::Idle => self.start_scheduled_run(),
            state => {
                self.status.dropped_ticks += 1;
                trace!(?state, dropped = self.status.dropped_ticks, "tick dropped");
            }
        }
    }

    fn start_scheduled_run(&mut self) {
        let every = u64::from(self.settings.speed_test_every);
        let include_speed_test = every != 0 && self.scheduled_runs % every == 0;
        self.scheduled_runs += 1;

        self.spawn_run(CollectRequest { include_speed_test }, None);
    }

    fn collect_now(&mut self, respond_to: Responder) {
        if !self.runs.is_empty() {
            debug!("manual collection rejected, a run is in flight");
            let _ = respond_to.send(Err(CollectError::AlreadyRunning(
                self.context.entity_id.clone(),
            )));
            return;
        }

        // the manual run replaces a pending retry
        self.retry_at = None;
        self.spawn_run(
            CollectRequest {
                include_speed_test: true,
            },
            Some(respond_to),
        );
    }

    fn spawn_run(&mut self, request: CollectRequest, respond_to: Option<Responder>) {
        debug!(speed_test = request.include_speed_test, "starting collection");

        let context = self.context.clone();
        self.runs.spawn(async move {
            RunOutcome {
                result: context.collect(request).await,
                respond_to,
            }
        });
    }

    async fn on_run_finished(&mut self, joined: Result<RunOutcome, JoinError>) {
        let (result, respond_to) = match joined {
            Ok(outcome) => (outcome.result, outcome.respond_to),
            Err(e) => (Err(CollectError::Aborted(e.to_string())), None),
        };

        self.status.runs += 1;
        let registry = &self.context.deps.registry;
        let entity_id = self.context.entity_id.as_str();

        match &result {
            Ok(snapshot) => {
                self.status.last_collection = Some(snapshot.timestamp);
                self.status.last_error = None;
                self.status.consecutive_failures = 0;
                self.retry_at = None;

                if let Err(e) = registry.set_status(entity_id, EntityStatus::Active).await {
                    warn!("failed to mark entity active: {e}");
                }
                if let Err(e) = registry.touch(entity_id, snapshot.timestamp).await {
                    warn!("failed to record last contact: {e}");
                }
            }
            Err(e) => {
                self.status.last_error = Some(e.to_string());
                self.status.consecutive_failures += 1;

                if self.enabled {
                    let delay = backoff_delay(
                        self.settings.interval,
                        self.settings.max_backoff,
                        self.status.consecutive_failures,
                    );
                    warn!(
                        failures = self.status.consecutive_failures,
                        "collection failed, retrying in {delay:?}: {e}"
                    );
                    self.retry_at = Some(Instant::now() + delay);
                } else {
                    warn!("collection failed: {e}");
                }

                if let Err(e) = registry.set_status(entity_id, EntityStatus::Inactive).await {
                    warn!("failed to mark entity inactive: {e}");
                }
            }
        }

        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(result);
        }
    }
}

/// Handle for controlling a CollectorActor
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct CollectorHandle {
    sender: mpsc::Sender<CollectorCommand>,
    status: watch::Receiver<JobStatus>,
    entity_id: String,
}

impl CollectorHandle {
    /// Spawn a collector actor for `entity_id` and return its handle.
    pub fn spawn(
        entity_id: impl Into<String>,
        probe: Arc<dyn Probe>,
        deps: CollectorDeps,
        settings: CollectorSettings,
        enabled: bool,
    ) -> Self {
        let entity_id = entity_id.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(JobStatus::new(
            entity_id.clone(),
            settings.interval.as_secs(),
            enabled,
        ));

        let context = RunContext {
            entity_id: entity_id.clone(),
            probe,
            deps,
        };
        let actor = CollectorActor::new(context, settings, enabled, cmd_rx, status_tx);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            status: status_rx,
            entity_id,
        }
    }

    async fn send(&self, command: CollectorCommand) -> Result<(), CollectError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| CollectError::ActorStopped)
    }

    /// Run a collection now and wait for the written snapshot.
    pub async fn collect_now(&self) -> Result<Snapshot, CollectError> {
        let (tx, rx) = oneshot::channel();
        self.send(CollectorCommand::CollectNow { respond_to: tx })
            .await?;
        rx.await.map_err(|_| CollectError::ActorStopped)?
    }

    /// Resume scheduled collection, returning the status once applied.
    pub async fn start(&self) -> Result<JobStatus, CollectError> {
        self.send(CollectorCommand::Start).await?;
        self.wait_for(|status| status.state != JobState::Disabled)
            .await
    }

    /// Pause scheduled collection, returning the status once applied.
    pub async fn stop(&self) -> Result<JobStatus, CollectError> {
        self.send(CollectorCommand::Stop).await?;
        self.wait_for(|status| status.state == JobState::Disabled)
            .await
    }

    async fn wait_for(
        &self,
        applied: impl FnMut(&JobStatus) -> bool,
    ) -> Result<JobStatus, CollectError> {
        let mut status = self.status.clone();
        let current = status
            .wait_for(applied)
            .await
            .map_err(|_| CollectError::ActorStopped)?
            .clone();
        Ok(current)
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<(), CollectError> {
        self.send(CollectorCommand::UpdateInterval { interval_secs })
            .await
    }

    /// Shut the actor down and wait until its in-flight run has finished.
    pub async fn shutdown(&self) -> Result<(), CollectError> {
        let mut status = self.status.clone();
        self.send(CollectorCommand::Shutdown).await?;
        while status.changed().await.is_ok() {}
        Ok(())
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}
