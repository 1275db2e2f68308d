//! Time-series storage for snapshots
//!
//! ## Design
//!
//! - **Trait-based**: `SnapshotStore` allows swapping implementations
//! - **Append-only**: snapshots are immutable once written, timestamps are
//!   strictly increasing per entity
//! - **Normalizing**: every document shape ever written decodes into the
//!   canonical `Snapshot`
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database in WAL mode
//! - **In-Memory**: No persistence, for testing or `backend = "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use netmon::storage::{SnapshotStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./metrics.db").await?;
//!     let health = store.health_check().await?;
//!     println!("{}", health.message);
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use aggregate::{Aggregate, AggregateOp, EntityScope, Metric, MetricValue, Observation};
pub use backend::{HealthStatus, SnapshotStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
