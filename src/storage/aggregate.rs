//! Metric selection and windowed aggregation over snapshots
//!
//! Backends that cannot push an aggregation down into their query language
//! fall back to [`aggregate_snapshots`], which operates on an already
//! fetched, chronologically ordered window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Snapshot, VpnStatus};

/// Which entities a read covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum EntityScope {
    Entity(String),
    All,
}

impl EntityScope {
    pub fn entity(id: impl Into<String>) -> Self {
        EntityScope::Entity(id.into())
    }

    pub fn matches(&self, entity_id: &str) -> bool {
        match self {
            EntityScope::Entity(id) => id == entity_id,
            EntityScope::All => true,
        }
    }
}

impl std::fmt::Display for EntityScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityScope::Entity(id) => write!(f, "{id}"),
            EntityScope::All => write!(f, "all servers"),
        }
    }
}

/// Queryable metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
    Download,
    VpnStatus,
    RecordCount,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Cpu => "CPU usage",
            Metric::Memory => "Memory usage",
            Metric::Disk => "Disk usage",
            Metric::Download => "Download speed",
            Metric::VpnStatus => "VPN status",
            Metric::RecordCount => "Records",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Cpu | Metric::Memory | Metric::Disk => "%",
            Metric::Download => " Mbps",
            Metric::VpnStatus | Metric::RecordCount => "",
        }
    }

    /// Column holding this metric in the SQLite `snapshots` table
    pub fn column(&self) -> Option<&'static str> {
        match self {
            Metric::Cpu => Some("cpu_percent"),
            Metric::Memory => Some("memory_percent"),
            Metric::Disk => Some("disk_percent"),
            Metric::Download => Some("download_mbps"),
            Metric::VpnStatus => Some("vpn_status"),
            Metric::RecordCount => None,
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Metric::VpnStatus)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Metric::Cpu | Metric::Memory | Metric::Disk | Metric::Download
        )
    }

    pub fn value_of(&self, snapshot: &Snapshot) -> Option<MetricValue> {
        match self {
            Metric::Cpu => snapshot.cpu.percent.map(MetricValue::Number),
            Metric::Memory => snapshot.memory.percent.map(MetricValue::Number),
            Metric::Disk => snapshot.disk.percent.map(MetricValue::Number),
            Metric::Download => snapshot.web.download_mbps.map(MetricValue::Number),
            Metric::VpnStatus => snapshot.web.vpn_status.map(MetricValue::Status),
            Metric::RecordCount => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Status(VpnStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Last,
    Avg,
    Count,
    List,
}

/// One metric value read from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: MetricValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Aggregate {
    /// Nothing in the window carried the metric
    Empty,
    Last(Observation),
    Average { value: f64, samples: usize },
    Count { count: usize },
    /// Chronological change records (first in-window value plus every change)
    Changes { changes: Vec<Observation> },
}

impl Aggregate {
    pub fn is_empty(&self) -> bool {
        match self {
            Aggregate::Empty => true,
            Aggregate::Count { count } => *count == 0,
            Aggregate::Changes { changes } => changes.is_empty(),
            _ => false,
        }
    }
}

/// Aggregate a chronologically ordered window of snapshots.
pub fn aggregate_snapshots(snapshots: &[Snapshot], metric: Metric, op: AggregateOp) -> Aggregate {
    if metric == Metric::RecordCount {
        return Aggregate::Count {
            count: snapshots.len(),
        };
    }

    let observations = snapshots.iter().filter_map(|snapshot| {
        metric.value_of(snapshot).map(|value| Observation {
            entity_id: snapshot.entity_id.clone(),
            timestamp: snapshot.timestamp,
            value,
        })
    });

    match op {
        AggregateOp::Count => Aggregate::Count {
            count: observations.count(),
        },
        AggregateOp::Last => observations
            .max_by_key(|o| o.timestamp)
            .map(Aggregate::Last)
            .unwrap_or(Aggregate::Empty),
        AggregateOp::Avg => {
            let (sum, samples) = observations
                .filter_map(|o| match o.value {
                    MetricValue::Number(n) => Some(n),
                    MetricValue::Status(_) => None,
                })
                .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));

            if samples == 0 {
                Aggregate::Empty
            } else {
                Aggregate::Average {
                    value: sum / samples as f64,
                    samples,
                }
            }
        }
        AggregateOp::List => Aggregate::Changes {
            changes: changes_of(observations),
        },
    }
}

/// Keep the first observation per entity and every later value change,
/// merged chronologically across entities.
fn changes_of(observations: impl Iterator<Item = Observation>) -> Vec<Observation> {
    let mut previous: HashMap<String, MetricValue> = HashMap::new();
    let mut changes = Vec::new();

    for observation in observations {
        let changed = previous
            .get(&observation.entity_id)
            .is_none_or(|prev| *prev != observation.value);

        if changed {
            previous.insert(observation.entity_id.clone(), observation.value);
            changes.push(observation);
        }
    }

    changes.sort_by_key(|o| o.timestamp);
    changes
}

/// Number of distinct values a change list holds.
pub fn distinct_values(changes: &[Observation]) -> usize {
    let mut seen: Vec<MetricValue> = Vec::new();
    for change in changes {
        if !seen.contains(&change.value) {
            seen.push(change.value);
        }
    }
    seen.len()
}
