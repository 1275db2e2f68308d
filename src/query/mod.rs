//! Natural-language questions over the snapshot history
//!
//! ```text
//! question → normalize → Intent (rule tables) → Store.range/aggregate
//!          → deterministic template → optional model rewording
//! ```
//!
//! Facts always come from the store and the templates. The model, when it
//! has been initialized, may only reword an answer; a rewording that loses
//! any fact is discarded.

pub mod intent;
pub mod model;
pub mod render;
pub mod rules;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::Snapshot;
use crate::registry::EntityRegistry;
use crate::storage::{
    Aggregate, AggregateOp, EntityScope, Metric, Observation, SnapshotStore, StorageError,
    aggregate::distinct_values,
};

pub use intent::{Ambiguity, EntityRef, Intent, TimeWindow};
pub use model::{HttpGenerator, InitOutcome, ModelError, ModelSession, ModelState, TextGenerator};
pub use render::{NO_DATA_ANSWER, Rendered};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(StorageError),

    #[error(transparent)]
    Store(StorageError),
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        if err.is_unavailable() {
            QueryError::StoreUnavailable(err)
        } else {
            QueryError::Store(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phrasing {
    Template,
    Model,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub response: String,
    /// The deterministic answer, identical to `response` for template phrasing
    pub template: String,
    pub phrasing: Phrasing,
    pub intent: Intent,
    pub model_status: ModelState,
}

pub struct QueryEngine {
    store: Arc<dyn SnapshotStore>,
    registry: Arc<dyn EntityRegistry>,
    model: Arc<ModelSession>,
    local_entity_id: String,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        registry: Arc<dyn EntityRegistry>,
        model: Arc<ModelSession>,
        local_entity_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            model,
            local_entity_id: local_entity_id.into(),
        }
    }

    pub fn model(&self) -> &Arc<ModelSession> {
        &self.model
    }

    pub async fn answer(&self, question: &str) -> Result<QueryAnswer, QueryError> {
        self.answer_at(question, Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn answer_at(
        &self,
        question: &str,
        now: DateTime<Utc>,
    ) -> Result<QueryAnswer, QueryError> {
        let text = rules::normalize(question);

        let entities = self.registry.list().await.unwrap_or_else(|e| {
            warn!("entity lookup failed, answering for the local entity: {e}");
            Vec::new()
        });
        let names: HashMap<String, String> = entities
            .iter()
            .map(|e| (e.id.clone(), e.name.clone()))
            .collect();

        let mut intent = Intent::parse(&text, now, &entities);
        debug!(?intent, "parsed question");

        let scope = intent.entity.scope(&self.local_entity_id);
        let rendered = self.execute(&mut intent, &scope, &names).await?;

        let model_status = self.model.state();
        let (response, phrasing) = match self.model.rephrase(question, &rendered).await {
            Some(reworded) => (reworded, Phrasing::Model),
            None => (rendered.text.clone(), Phrasing::Template),
        };

        Ok(QueryAnswer {
            response,
            template: rendered.text,
            phrasing,
            intent,
            model_status,
        })
    }

    async fn execute(
        &self,
        intent: &mut Intent,
        scope: &EntityScope,
        names: &HashMap<String, String>,
    ) -> Result<Rendered, QueryError> {
        let names = render::Names(names);
        let (start, end) = (intent.window.start, intent.window.end);

        let subject = match scope {
            EntityScope::Entity(id) => names.0.get(id).cloned().unwrap_or_else(|| id.clone()),
            EntityScope::All => scope.to_string(),
        };

        let Some(metric) = intent.metric else {
            let window = self.store.range(scope, start, end).await?;
            return Ok(render::render_overview(&latest_per_entity(window), &names));
        };

        let aggregate = if metric.is_status() && intent.aggregation != AggregateOp::Count {
            self.status_aggregate(intent, scope, metric).await?
        } else {
            self.store
                .aggregate(scope, metric, intent.aggregation, start, end)
                .await?
        };

        let rendered = render::render_aggregate(
            metric,
            &aggregate,
            &subject,
            &intent.window.label,
            &names,
        );

        match (metric, &aggregate) {
            (Metric::Download, Aggregate::Last(observation)) => {
                Ok(match self.snapshot_at(observation).await? {
                    Some(snapshot) => render::with_speed_details(rendered, &snapshot),
                    None => rendered,
                })
            }
            _ => Ok(rendered),
        }
    }

    /// The snapshot an observation was read from
    async fn snapshot_at(&self, observation: &Observation) -> Result<Option<Snapshot>, QueryError> {
        let scope = EntityScope::entity(&observation.entity_id);
        let at = observation.timestamp;
        let window = self
            .store
            .range(&scope, at, at + Duration::milliseconds(1))
            .await?;
        Ok(window.into_iter().find(|s| s.timestamp == at))
    }

    /// Status metrics are listed when the window holds more than one value
    /// or a list was asked for, and reported as the last value otherwise.
    async fn status_aggregate(
        &self,
        intent: &mut Intent,
        scope: &EntityScope,
        metric: Metric,
    ) -> Result<Aggregate, QueryError> {
        let (start, end) = (intent.window.start, intent.window.end);
        let changes = self
            .store
            .aggregate(scope, metric, AggregateOp::List, start, end)
            .await?;

        let list = match &changes {
            Aggregate::Changes { changes } => {
                intent.aggregation == AggregateOp::List || distinct_values(changes) > 1
            }
            _ => false,
        };

        if list {
            intent.aggregation = AggregateOp::List;
            return Ok(changes);
        }

        intent.aggregation = AggregateOp::Last;
        Ok(self
            .store
            .aggregate(scope, metric, AggregateOp::Last, start, end)
            .await?)
    }
}

/// Most recent snapshot of each entity in a chronological window
fn latest_per_entity(window: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut latest: HashMap<String, Snapshot> = HashMap::new();
    for snapshot in window {
        latest.insert(snapshot.entity_id.clone(), snapshot);
    }

    let mut latest: Vec<Snapshot> = latest.into_values().collect();
    latest.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    latest
}
