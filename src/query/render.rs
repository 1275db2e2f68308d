//! Deterministic answer templates
//!
//! Every answer carries the facts it states (formatted values and
//! timestamps) so a reworded answer can be checked against them.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::Snapshot;
use crate::storage::{Aggregate, Metric, MetricValue, Observation};

pub const NO_DATA_ANSWER: &str = "No data found for the requested time window.";

/// Change lists longer than this are truncated
const MAX_LISTED_CHANGES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub facts: Vec<String>,
}

impl Rendered {
    pub fn no_data() -> Self {
        Self {
            text: NO_DATA_ANSWER.to_string(),
            facts: Vec::new(),
        }
    }

    fn fact(&mut self, fact: String) {
        if !self.facts.contains(&fact) {
            self.facts.push(fact);
        }
    }
}

/// Display names by entity id; unknown ids are shown as-is.
pub struct Names<'a>(pub &'a HashMap<String, String>);

impl Names<'_> {
    fn of<'b>(&'b self, entity_id: &'b str) -> &'b str {
        self.0.get(entity_id).map(String::as_str).unwrap_or(entity_id)
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The value without its unit, as it appears in the answer
fn bare_value(value: &MetricValue) -> String {
    match value {
        MetricValue::Number(n) => format!("{n:.1}"),
        MetricValue::Status(status) => status.to_string(),
    }
}

pub fn format_value(metric: Metric, value: &MetricValue) -> String {
    match value {
        MetricValue::Number(_) => format!("{}{}", bare_value(value), metric.unit()),
        MetricValue::Status(_) => bare_value(value),
    }
}

pub fn render_aggregate(
    metric: Metric,
    aggregate: &Aggregate,
    subject: &str,
    window: &str,
    names: &Names<'_>,
) -> Rendered {
    if aggregate.is_empty() {
        return Rendered::no_data();
    }

    match aggregate {
        Aggregate::Empty => Rendered::no_data(),

        Aggregate::Last(observation) => render_last(metric, observation, names),

        Aggregate::Average { value, samples } => {
            let value = MetricValue::Number(*value);
            let mut rendered = Rendered {
                text: format!(
                    "Average {} on {subject} during {window} was {} across {samples} samples.",
                    metric.label(),
                    format_value(metric, &value),
                ),
                facts: Vec::new(),
            };
            rendered.fact(bare_value(&value));
            rendered.fact(samples.to_string());
            rendered
        }

        Aggregate::Count { count } => {
            let what = match metric {
                Metric::RecordCount => "records".to_string(),
                other => format!("{} readings", other.label()),
            };
            let mut rendered = Rendered {
                text: format!("Found {count} {what} for {subject} during {window}."),
                facts: Vec::new(),
            };
            rendered.fact(count.to_string());
            rendered
        }

        Aggregate::Changes { changes } => render_changes(metric, changes, subject, window, names),
    }
}

fn render_last(metric: Metric, observation: &Observation, names: &Names<'_>) -> Rendered {
    let timestamp = format_timestamp(observation.timestamp);
    let mut rendered = Rendered {
        text: format!(
            "{} on {} was {} at {timestamp}.",
            metric.label(),
            names.of(&observation.entity_id),
            format_value(metric, &observation.value),
        ),
        facts: Vec::new(),
    };
    rendered.fact(bare_value(&observation.value));
    rendered
}

/// Adds the upload and ping measured alongside a download reading.
pub fn with_speed_details(mut rendered: Rendered, snapshot: &Snapshot) -> Rendered {
    let mut details = Vec::new();
    if let Some(upload) = snapshot.web.upload_mbps {
        let upload = format!("{upload:.1}");
        details.push(format!("upload {upload} Mbps"));
        rendered.fact(upload);
    }
    if let Some(ping) = snapshot.web.ping_ms {
        let ping = format!("{ping:.1}");
        details.push(format!("ping {ping} ms"));
        rendered.fact(ping);
    }

    if !details.is_empty() {
        rendered.text.push_str(&format!(" The same test measured {}.", details.join(" and ")));
    }
    rendered
}

fn render_changes(
    metric: Metric,
    changes: &[Observation],
    subject: &str,
    window: &str,
    names: &Names<'_>,
) -> Rendered {
    let several_entities = changes
        .iter()
        .any(|c| c.entity_id != changes[0].entity_id);

    let mut rendered = Rendered {
        text: format!("{} changes for {subject} during {window}:", metric.label()),
        facts: Vec::new(),
    };

    for change in changes.iter().take(MAX_LISTED_CHANGES) {
        let timestamp = format_timestamp(change.timestamp);
        let value = format_value(metric, &change.value);

        rendered.text.push_str("\n- ");
        rendered.text.push_str(&timestamp);
        rendered.text.push_str(": ");
        rendered.text.push_str(&value);
        if several_entities {
            rendered.text.push_str(&format!(" ({})", names.of(&change.entity_id)));
        }

        rendered.fact(timestamp);
        rendered.fact(bare_value(&change.value));
    }

    if changes.len() > MAX_LISTED_CHANGES {
        rendered.text.push_str(&format!(
            "\n... and {} more",
            changes.len() - MAX_LISTED_CHANGES
        ));
    }

    rendered
}

/// Latest snapshot per entity, summarized.
pub fn render_overview(latest: &[Snapshot], names: &Names<'_>) -> Rendered {
    if latest.is_empty() {
        return Rendered::no_data();
    }

    let mut rendered = Rendered {
        text: String::new(),
        facts: Vec::new(),
    };

    for (i, snapshot) in latest.iter().enumerate() {
        let mut parts = Vec::new();
        for (label, metric) in [
            ("CPU", Metric::Cpu),
            ("memory", Metric::Memory),
            ("disk", Metric::Disk),
            ("download", Metric::Download),
            ("VPN", Metric::VpnStatus),
        ] {
            if let Some(value) = metric.value_of(snapshot) {
                parts.push(format!("{label} {}", format_value(metric, &value)));
                rendered.fact(bare_value(&value));
            }
        }

        if i > 0 {
            rendered.text.push('\n');
        }

        let timestamp = format_timestamp(snapshot.timestamp);
        let summary = if parts.is_empty() {
            "no measurements".to_string()
        } else {
            parts.join(", ")
        };
        rendered.text.push_str(&format!(
            "{} at {timestamp}: {summary}.",
            names.of(&snapshot.entity_id)
        ));
    }

    rendered
}
