//! Ordered rule tables for reading questions
//!
//! Every table is evaluated top to bottom and the first matching row wins.
//! Questions are expected to be normalized with [`normalize`] first.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use regex::Regex;

use super::intent::TimeWindow;
use crate::registry::MonitoredEntity;
use crate::storage::{AggregateOp, Metric};

/// Lowercase, trim, collapse whitespace.
pub fn normalize(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeRule {
    /// "last 3 hours", "past 15 minutes", "son 2 saat"
    Relative,
    /// "last hour", "past day", "son hafta"
    LastUnit,
    Today,
    Yesterday,
    /// "at 14:30", ±30 minutes around it
    ClockTime,
}

static TIME_RULES: LazyLock<Vec<(TimeRule, Regex)>> = LazyLock::new(|| {
    [
        (
            TimeRule::Relative,
            r"\b(?:last|past|son)\s+(\d{1,4})\s*(minutes?|mins?|hours?|hrs?|days?|weeks?|dakika|saat|gün|hafta)",
        ),
        (
            TimeRule::LastUnit,
            r"\b(?:last|past|son)\s+(minute|hour|day|week|dakika|saat|gün|hafta)",
        ),
        (TimeRule::Today, r"\b(?:today|bugün)"),
        (TimeRule::Yesterday, r"\b(?:yesterday|dün)"),
        (TimeRule::ClockTime, r"\b([01]?\d|2[0-3]):([0-5]\d)\b"),
    ]
    .into_iter()
    .filter_map(|(rule, pattern)| Regex::new(pattern).ok().map(|re| (rule, re)))
    .collect()
});

/// Window length unit, English label first
fn unit_of(raw: &str) -> Option<(Duration, &'static str)> {
    if raw.starts_with("min") || raw == "dakika" {
        Some((Duration::minutes(1), "minute"))
    } else if raw.starts_with('h') || raw == "saat" {
        Some((Duration::hours(1), "hour"))
    } else if raw.starts_with('d') || raw == "gün" {
        Some((Duration::days(1), "day"))
    } else if raw.starts_with('w') || raw == "hafta" {
        Some((Duration::weeks(1), "week"))
    } else {
        None
    }
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// First time expression in `text`, if any.
pub fn time_window(text: &str, now: DateTime<Utc>) -> Option<TimeWindow> {
    TIME_RULES.iter().find_map(|(rule, re)| {
        let captures = re.captures(text)?;

        match rule {
            TimeRule::Relative => {
                let count: i32 = captures.get(1)?.as_str().parse().ok()?;
                let (unit, name) = unit_of(captures.get(2)?.as_str())?;
                let plural = if count == 1 { "" } else { "s" };
                Some(TimeWindow::until_now(
                    now,
                    unit * count,
                    format!("the last {count} {name}{plural}"),
                ))
            }
            TimeRule::LastUnit => {
                let (unit, name) = unit_of(captures.get(1)?.as_str())?;
                Some(TimeWindow::until_now(now, unit, format!("the last {name}")))
            }
            TimeRule::Today => {
                let start = start_of_day(now);
                Some(TimeWindow::until_now(now, now - start, "today".to_string()))
            }
            TimeRule::Yesterday => {
                let end = start_of_day(now);
                Some(TimeWindow {
                    start: end - Duration::days(1),
                    end,
                    label: "yesterday".to_string(),
                })
            }
            TimeRule::ClockTime => {
                let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
                let minute: u32 = captures.get(2)?.as_str().parse().ok()?;
                let at = now
                    .date_naive()
                    .and_time(NaiveTime::from_hms_opt(hour, minute, 0)?)
                    .and_utc();
                Some(TimeWindow {
                    start: at - Duration::minutes(30),
                    end: at + Duration::minutes(30),
                    label: format!("the hour around {hour:02}:{minute:02}"),
                })
            }
        }
    })
}

static METRIC_RULES: LazyLock<Vec<(Metric, Regex)>> = LazyLock::new(|| {
    [
        (Metric::Cpu, r"\b(?:cpu|processor|işlemci)"),
        (Metric::Memory, r"\b(?:memory|ram|bellek)\b"),
        (Metric::Disk, r"\b(?:disk|storage)"),
        (
            Metric::Download,
            r"\b(?:download|internet speed|bandwidth|mbps|indirme)",
        ),
        (Metric::VpnStatus, r"\b(?:vpn|connection status|proxy)"),
        (
            Metric::RecordCount,
            r"\b(?:records?|entries|entry|samples?|data points?|kayıt)",
        ),
    ]
    .into_iter()
    .filter_map(|(metric, pattern)| Regex::new(pattern).ok().map(|re| (metric, re)))
    .collect()
});

/// Every metric mentioned in `text`, in table order.
pub fn metrics_mentioned(text: &str) -> Vec<Metric> {
    METRIC_RULES
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(metric, _)| *metric)
        .collect()
}

static AGGREGATION_RULES: LazyLock<Vec<(AggregateOp, Regex)>> = LazyLock::new(|| {
    [
        (AggregateOp::Count, r"\b(?:how many|count|number of|kaç)\b"),
        (AggregateOp::Avg, r"\b(?:average|avg|mean|ortalama)"),
        (
            AggregateOp::List,
            r"\b(?:history|changes?|changed|list|timeline|geçmiş)",
        ),
    ]
    .into_iter()
    .filter_map(|(op, pattern)| Regex::new(pattern).ok().map(|re| (op, re)))
    .collect()
});

/// Aggregation asked for explicitly, if any.
pub fn aggregation_phrase(text: &str) -> Option<AggregateOp> {
    AGGREGATION_RULES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(op, _)| *op)
}

static ALL_ENTITIES: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(?:all|every|each)\s+(?:servers?|hosts?|machines?|entities)|tüm sunucular|bütün sunucular)",
    )
    .ok()
});

pub fn mentions_all_entities(text: &str) -> bool {
    ALL_ENTITIES.as_ref().is_some_and(|re| re.is_match(text))
}

/// Whole-word, case-insensitive occurrence of `needle` in `haystack`.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }

    // \b only applies next to word characters
    let start = if needle.starts_with(|c: char| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    let end = if needle.ends_with(|c: char| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };

    Regex::new(&format!("(?i){start}{}{end}", regex::escape(needle)))
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

/// The registered entity named in `text`; the longest id or name wins.
pub fn entity_mentioned<'a>(text: &str, entities: &'a [MonitoredEntity]) -> Option<&'a MonitoredEntity> {
    entities
        .iter()
        .flat_map(|entity| {
            [entity.id.as_str(), entity.name.as_str()]
                .into_iter()
                .filter(|candidate| candidate.chars().count() >= 2)
                .filter(|candidate| contains_word(text, candidate))
                .map(move |candidate| (candidate.len(), entity))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, entity)| entity)
}
