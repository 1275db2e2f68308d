use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::{Measurements, Snapshot};

/// Stamps measurements into snapshots.
///
/// Timestamps have millisecond precision and are strictly increasing per
/// entity: when the clock has not advanced past the previous snapshot (or
/// went backwards) the previous timestamp plus one millisecond is used.
#[derive(Default)]
pub struct SnapshotAssembler {
    last: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SnapshotAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the last known timestamp for an entity, typically from the store.
    pub fn prime(&self, entity_id: &str, latest: DateTime<Utc>) {
        let mut last = self.last.lock();
        let entry = last.entry(entity_id.to_string()).or_insert(latest);
        if latest > *entry {
            *entry = latest;
        }
    }

    /// Whether a previous timestamp is known for the entity.
    pub fn knows(&self, entity_id: &str) -> bool {
        self.last.lock().contains_key(entity_id)
    }

    pub fn next_timestamp(&self, entity_id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = truncate_to_millis(now);
        let mut last = self.last.lock();

        let stamped = match last.get(entity_id) {
            Some(previous) if now <= *previous => {
                debug!(entity = %entity_id, "clock did not advance, nudging timestamp");
                *previous + Duration::milliseconds(1)
            }
            _ => now,
        };

        last.insert(entity_id.to_string(), stamped);
        stamped
    }

    pub fn assemble(&self, entity_id: &str, measurements: Measurements) -> Snapshot {
        self.assemble_at(entity_id, measurements, Utc::now())
    }

    pub fn assemble_at(
        &self,
        entity_id: &str,
        measurements: Measurements,
        now: DateTime<Utc>,
    ) -> Snapshot {
        let timestamp = self.next_timestamp(entity_id, now);
        measurements.into_snapshot(entity_id, timestamp)
    }

    /// Forget an entity, e.g. after it was removed from the registry.
    pub fn forget(&self, entity_id: &str) {
        self.last.lock().remove(entity_id);
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
