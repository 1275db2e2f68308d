use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::rules;
use crate::registry::MonitoredEntity;
use crate::storage::{AggregateOp, EntityScope, Metric};

/// Half-open window `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
}

impl TimeWindow {
    /// Window of `length` ending now. The current millisecond is included so
    /// a snapshot written right before the question is visible.
    pub fn until_now(now: DateTime<Utc>, length: Duration, label: String) -> Self {
        Self {
            start: now - length,
            end: now + Duration::milliseconds(1),
            label,
        }
    }

    pub fn last_day(now: DateTime<Utc>) -> Self {
        Self::until_now(now, Duration::hours(24), "the last 24 hours".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum EntityRef {
    /// No entity named; the local entity
    Local,
    Entity(String),
    All,
}

impl EntityRef {
    pub fn scope(&self, local_entity_id: &str) -> EntityScope {
        match self {
            EntityRef::Local => EntityScope::entity(local_entity_id),
            EntityRef::Entity(id) => EntityScope::entity(id.as_str()),
            EntityRef::All => EntityScope::All,
        }
    }
}

/// A default that was applied because the question left something open.
/// Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Ambiguity {
    /// No time expression, the last 24 hours were used
    DefaultWindow,
    /// No metric keyword, answered with an overview
    NoMetric,
    /// Several metrics named, the highest priority one was used
    MultipleMetrics { chosen: Metric, ignored: Vec<Metric> },
    /// Status values cannot be averaged
    StatusAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    /// `None` asks for an overview of the latest snapshot
    pub metric: Option<Metric>,
    pub aggregation: AggregateOp,
    pub window: TimeWindow,
    pub entity: EntityRef,
    pub fallbacks: Vec<Ambiguity>,
}

impl Intent {
    /// Read a normalized question. Never fails: anything left open is
    /// defaulted and recorded in `fallbacks`.
    pub fn parse(text: &str, now: DateTime<Utc>, entities: &[MonitoredEntity]) -> Self {
        let mut fallbacks = Vec::new();

        let window = rules::time_window(text, now).unwrap_or_else(|| {
            fallbacks.push(Ambiguity::DefaultWindow);
            TimeWindow::last_day(now)
        });

        let mentioned = rules::metrics_mentioned(text);
        let mut metric = mentioned.first().copied();
        if let [chosen, ignored @ ..] = mentioned.as_slice() {
            if !ignored.is_empty() {
                fallbacks.push(Ambiguity::MultipleMetrics {
                    chosen: *chosen,
                    ignored: ignored.to_vec(),
                });
            }
        }

        let phrase = rules::aggregation_phrase(text);
        let aggregation = match (metric, phrase) {
            (Some(Metric::RecordCount), _) => AggregateOp::Count,
            (None, Some(AggregateOp::Count)) => {
                metric = Some(Metric::RecordCount);
                AggregateOp::Count
            }
            (None, _) => {
                fallbacks.push(Ambiguity::NoMetric);
                AggregateOp::Last
            }
            (Some(m), Some(AggregateOp::Avg)) if m.is_status() => {
                fallbacks.push(Ambiguity::StatusAverage);
                AggregateOp::Last
            }
            (Some(_), Some(op)) => op,
            (Some(_), None) => AggregateOp::Last,
        };

        let entity = if rules::mentions_all_entities(text) {
            EntityRef::All
        } else {
            rules::entity_mentioned(text, entities)
                .map(|e| EntityRef::Entity(e.id.clone()))
                .unwrap_or(EntityRef::Local)
        };

        Self {
            metric,
            aggregation,
            window,
            entity,
            fallbacks,
        }
    }
}
