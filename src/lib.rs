pub mod actors;
pub mod api;
pub mod config;
pub mod monitors;
pub mod query;
pub mod registry;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable, timestamped measurement record for an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuSample,
    pub memory: MemorySample,
    pub disk: DiskSample,
    pub network: NetworkSample,
    pub web: WebSample,
    #[serde(default)]
    pub host: SystemInformation,
}

/// Everything a probe measures, before the assembler stamps it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub cpu: CpuSample,
    pub memory: MemorySample,
    pub disk: DiskSample,
    pub network: NetworkSample,
    pub web: WebSample,
    #[serde(default)]
    pub host: SystemInformation,
}

impl Measurements {
    pub fn into_snapshot(self, entity_id: impl Into<String>, timestamp: DateTime<Utc>) -> Snapshot {
        Snapshot {
            entity_id: entity_id.into(),
            timestamp,
            cpu: self.cpu,
            memory: self.memory,
            disk: self.disk,
            network: self.network,
            web: self.web,
            host: self.host,
        }
    }
}

impl From<Snapshot> for Measurements {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            cpu: snapshot.cpu,
            memory: snapshot.memory,
            disk: snapshot.disk,
            network: snapshot.network,
            web: snapshot.web,
            host: snapshot.host,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInformation {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub percent: Option<f64>,
    pub logical_count: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub percent: Option<f64>,
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskSample {
    pub percent: Option<f64>,
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSample {
    pub io: Option<NetworkCounters>,
    pub connection_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errors_in: u64,
    pub errors_out: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSample {
    pub public_ip: Option<IpAddr>,
    pub vpn_status: Option<VpnStatus>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,

    /// How each network capability was resolved for this sample
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub probes: BTreeMap<Capability, ProbeOutcome>,
}

impl WebSample {
    /// A capability counts as degraded when its first provider did not answer.
    pub fn is_degraded(&self, capability: Capability) -> bool {
        self.probes
            .get(&capability)
            .is_some_and(|outcome| outcome.health != ProbeHealth::Healthy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnStatus {
    On,
    Off,
    Unknown,
}

impl std::fmt::Display for VpnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VpnStatus::On => write!(f, "on"),
            VpnStatus::Off => write!(f, "off"),
            VpnStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Network capabilities resolved through ordered provider lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    PublicIp,
    VpnState,
    SpeedTest,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::PublicIp => write!(f, "public-ip"),
            Capability::VpnState => write!(f, "vpn-state"),
            Capability::SpeedTest => write!(f, "speed-test"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeHealth {
    /// First provider answered
    Healthy,
    /// A fallback provider answered after earlier failures
    Degraded,
    /// Every provider failed, the field is null
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub health: ProbeHealth,
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailedAttempt>,
}

impl ProbeOutcome {
    pub fn answered(provider: impl Into<String>, failures: Vec<FailedAttempt>) -> Self {
        let health = if failures.is_empty() {
            ProbeHealth::Healthy
        } else {
            ProbeHealth::Degraded
        };

        Self {
            health,
            provider: Some(provider.into()),
            failures,
        }
    }

    pub fn unavailable(failures: Vec<FailedAttempt>) -> Self {
        Self {
            health: ProbeHealth::Unavailable,
            provider: None,
            failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub provider: String,
    pub reason: String,
}
