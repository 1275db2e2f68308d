//! Actor-based collection pipeline
//!
//! Each monitored entity gets its own collector actor running as an
//! independent tokio task. Actors are driven through handles over mpsc
//! command channels and publish their job status on a watch channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │    Scheduler    │ ◄── registry sync
//!                    └────────┬────────┘
//!                             │ spawns
//!                ┌────────────┼────────────┐
//!                │            │            │
//!        ┌───────▼───────┐    │    ┌───────▼───────┐
//!        │ Collector-1   │    │    │ Collector-N   │
//!        │ (localhost)   │    │    │ (remote)      │
//!        └───────┬───────┘    │    └───────┬───────┘
//!                │  Probe → Assembler      │
//!                └────────────┼────────────┘
//!                             │ append
//!                   ┌─────────▼──────────┐
//!                   │   SnapshotStore    │ ◄── RetentionActor
//!                   └────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc channel per collector (collect now, start, stop, ...)
//! 2. **Status**: watch channel, always holding the latest `JobStatus`
//! 3. **Request/Response**: oneshot channels for manual collections

pub mod collector;
pub mod messages;
pub mod retention;
pub mod scheduler;

pub use collector::{CollectorDeps, CollectorHandle, CollectorSettings};
pub use messages::{CollectError, JobState, JobStatus};
pub use retention::RetentionHandle;
pub use scheduler::Scheduler;
