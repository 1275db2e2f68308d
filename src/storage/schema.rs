//! Snapshot rows and document normalization
//!
//! ## Hybrid layout
//!
//! The metrics the query engine filters and aggregates on are kept as typed
//! columns (`cpu_percent`, `memory_percent`, `disk_percent`, `download_mbps`,
//! `vpn_status`). The complete snapshot is kept next to them as one JSON
//! document, so a snapshot is always written and read back as a unit.
//!
//! ## Legacy documents
//!
//! Older collectors wrote two other document shapes. Both are mapped onto the
//! canonical [`Snapshot`] here, at the store boundary:
//!
//! - nested: `system_data.cpu.cpu_percent`,
//!   `system_data.memory.virtual_memory.percent`,
//!   `system_data.disk.disk_usage.main.percent`,
//!   `web_data.speed_test.download_speed`, `web_data.vpn_detection.status`,
//!   `web_data.ip_address`
//! - flat: `cpu_percent`, `memory_percent`, `disk_usage`, `download_speed`,
//!   `vpn_status`

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;

use super::error::{StorageError, StorageResult};
use crate::{
    CpuSample, DiskSample, MemorySample, NetworkCounters, NetworkSample, Snapshot,
    SystemInformation, VpnStatus, WebSample,
};

/// A snapshot as laid out in the `snapshots` table
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub entity_id: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub download_mbps: Option<f64>,
    pub vpn_status: Option<String>,
    pub document: String,
}

impl SnapshotRow {
    pub fn from_snapshot(snapshot: &Snapshot) -> StorageResult<Self> {
        Ok(Self {
            entity_id: snapshot.entity_id.clone(),
            timestamp: snapshot.timestamp.timestamp_millis(),
            cpu_percent: snapshot.cpu.percent,
            memory_percent: snapshot.memory.percent,
            disk_percent: snapshot.disk.percent,
            download_mbps: snapshot.web.download_mbps,
            vpn_status: snapshot.web.vpn_status.map(|s| s.to_string()),
            document: serde_json::to_string(snapshot)?,
        })
    }
}

const CPU_PERCENT: &[&str] = &[
    "/cpu/percent",
    "/system_data/cpu/cpu_percent",
    "/cpu/cpu_percent",
    "/cpu_percent",
];
const CPU_COUNT: &[&str] = &[
    "/cpu/logical_count",
    "/system_data/cpu/cpu_count_logical",
    "/cpu/cpu_count_logical",
    "/system_data/cpu/cpu_count",
];
const MEMORY_PERCENT: &[&str] = &[
    "/memory/percent",
    "/system_data/memory/virtual_memory/percent",
    "/memory/virtual_memory/percent",
    "/memory_percent",
];
const MEMORY_TOTAL: &[&str] = &[
    "/memory/total_bytes",
    "/system_data/memory/virtual_memory/total",
    "/memory/virtual_memory/total",
];
const MEMORY_USED: &[&str] = &[
    "/memory/used_bytes",
    "/system_data/memory/virtual_memory/used",
    "/memory/virtual_memory/used",
];
const DISK_PERCENT: &[&str] = &[
    "/disk/percent",
    "/system_data/disk/disk_usage/main/percent",
    "/disk/disk_usage/main/percent",
    "/disk_usage",
];
const DISK_TOTAL: &[&str] = &[
    "/disk/total_bytes",
    "/system_data/disk/disk_usage/main/total",
    "/disk/disk_usage/main/total",
];
const DISK_USED: &[&str] = &[
    "/disk/used_bytes",
    "/system_data/disk/disk_usage/main/used",
    "/disk/disk_usage/main/used",
];
const NETWORK_IO: &[&str] = &[
    "/network/io",
    "/system_data/network/network_io",
    "/network/network_io",
];
const CONNECTIONS: &[&str] = &[
    "/network/connection_count",
    "/system_data/network/network_connections/total_connections",
    "/network/network_connections/total_connections",
];
const PUBLIC_IP: &[&str] = &[
    "/web/public_ip",
    "/web_data/ip_address",
    "/web_data/ip_info/ip",
    "/ip_address",
];
const VPN_STATUS: &[&str] = &[
    "/web/vpn_status",
    "/web_data/vpn_detection/status",
    "/vpn_detection/status",
    "/vpn_status",
];
const DOWNLOAD: &[&str] = &[
    "/web/download_mbps",
    "/web_data/speed_test/download_speed",
    "/speed_test/download_speed",
    "/download_speed",
];
const UPLOAD: &[&str] = &[
    "/web/upload_mbps",
    "/web_data/speed_test/upload_speed",
    "/speed_test/upload_speed",
    "/upload_speed",
];
const PING: &[&str] = &["/web/ping_ms", "/web_data/speed_test/ping", "/speed_test/ping"];
const TIMESTAMP: &[&str] = &["/timestamp", "/collection_timestamp", "/system_data/timestamp"];
const ENTITY_ID: &[&str] = &["/entity_id", "/server_id"];

fn lookup<'a>(doc: &'a Value, pointers: &[&str]) -> Option<&'a Value> {
    pointers
        .iter()
        .filter_map(|p| doc.pointer(p))
        .find(|v| !v.is_null())
}

fn number(doc: &Value, pointers: &[&str]) -> Option<f64> {
    pointers
        .iter()
        .filter_map(|p| doc.pointer(p))
        .find_map(|v| v.as_f64())
}

fn unsigned(doc: &Value, pointers: &[&str]) -> Option<u64> {
    pointers
        .iter()
        .filter_map(|p| doc.pointer(p))
        .find_map(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
}

fn text<'a>(doc: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .filter_map(|p| doc.pointer(p))
        .find_map(|v| v.as_str())
}

/// Map the many spellings of a VPN verdict onto [`VpnStatus`].
pub fn parse_vpn_status(raw: &str) -> VpnStatus {
    let lowered = raw.trim().to_lowercase();

    match lowered.as_str() {
        "on" | "true" | "yes" | "active" | "connected" | "detected" | "vpn_detected" => {
            return VpnStatus::On;
        }
        "off" | "false" | "no" | "none" | "inactive" | "disconnected" | "no_vpn" => {
            return VpnStatus::Off;
        }
        _ => {}
    }

    VPN_VERDICTS
        .iter()
        .find(|(_, re)| re.is_match(&lowered))
        .map_or(VpnStatus::Unknown, |(status, _)| *status)
}

/// Free-text verdicts, first match wins. Failures are checked before
/// negations, negations before positive phrases.
static VPN_VERDICTS: LazyLock<Vec<(VpnStatus, Regex)>> = LazyLock::new(|| {
    [
        (
            VpnStatus::Unknown,
            r"\b(?:failed|retrieval|alınamadı|not implemented|bilinmiyor)\b",
        ),
        (
            VpnStatus::Off,
            r"\b(?:no_vpn|no vpn|not|değil|kullanılmıyor|yok|inaktif|inactive|disconnected)\b",
        ),
        (
            VpnStatus::On,
            r"\b(?:vpn_detected|detected|bağlı|aktif|active|kullanılıyor|connected)\b",
        ),
    ]
    .into_iter()
    .filter_map(|(status, pattern)| Regex::new(pattern).ok().map(|re| (status, re)))
    .collect()
});

/// Parse RFC 3339 timestamps, and naive ISO timestamps as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn network_counters(doc: &Value) -> Option<NetworkCounters> {
    let io = lookup(doc, NETWORK_IO)?;
    if !io.is_object() {
        return None;
    }

    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| io.get(*n).and_then(Value::as_u64))
            .unwrap_or(0)
    };

    Some(NetworkCounters {
        bytes_sent: field(&["bytes_sent"]),
        bytes_recv: field(&["bytes_recv"]),
        packets_sent: field(&["packets_sent"]),
        packets_recv: field(&["packets_recv"]),
        errors_in: field(&["errors_in", "errin"]),
        errors_out: field(&["errors_out", "errout"]),
    })
}

/// Decode any known document shape into a canonical snapshot.
///
/// `entity_id` and `fallback_timestamp` are used when the document does not
/// carry its own.
pub fn normalize_document(
    doc: &Value,
    entity_id: &str,
    fallback_timestamp: Option<DateTime<Utc>>,
) -> StorageResult<Snapshot> {
    if let Ok(snapshot) = serde_json::from_value::<Snapshot>(doc.clone()) {
        return Ok(snapshot);
    }

    if !doc.is_object() {
        return Err(StorageError::Serialization(
            "snapshot document is not a JSON object".to_string(),
        ));
    }

    let timestamp = text(doc, TIMESTAMP)
        .and_then(parse_timestamp)
        .or(fallback_timestamp)
        .ok_or_else(|| {
            StorageError::Serialization("snapshot document carries no timestamp".to_string())
        })?;

    let entity_id = text(doc, ENTITY_ID).unwrap_or(entity_id).to_string();

    Ok(Snapshot {
        entity_id,
        timestamp,
        cpu: CpuSample {
            percent: number(doc, CPU_PERCENT),
            logical_count: unsigned(doc, CPU_COUNT).map(|c| c as usize),
        },
        memory: MemorySample {
            percent: number(doc, MEMORY_PERCENT),
            total_bytes: unsigned(doc, MEMORY_TOTAL),
            used_bytes: unsigned(doc, MEMORY_USED),
        },
        disk: DiskSample {
            percent: number(doc, DISK_PERCENT),
            total_bytes: unsigned(doc, DISK_TOTAL),
            used_bytes: unsigned(doc, DISK_USED),
        },
        network: NetworkSample {
            io: network_counters(doc),
            connection_count: unsigned(doc, CONNECTIONS),
        },
        web: WebSample {
            public_ip: text(doc, PUBLIC_IP).and_then(|ip| ip.trim().parse().ok()),
            vpn_status: text(doc, VPN_STATUS).map(parse_vpn_status),
            download_mbps: number(doc, DOWNLOAD),
            upload_mbps: number(doc, UPLOAD),
            ping_ms: number(doc, PING),
            probes: Default::default(),
        },
        host: SystemInformation {
            host_name: text(doc, &["/host/host_name", "/system_data/hostname", "/hostname"])
                .map(str::to_string),
            os_name: text(doc, &["/host/os_name", "/system_data/platform", "/platform"])
                .map(str::to_string),
            ..Default::default()
        },
    })
}
