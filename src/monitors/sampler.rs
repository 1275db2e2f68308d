//! Local host counters via `sysinfo`
//!
//! Sampling has no error path: a counter the platform cannot provide is
//! simply left as `None`.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{Disks, Networks, System};
use tracing::{instrument, trace, warn};

use crate::{
    CpuSample, DiskSample, MemorySample, NetworkCounters, NetworkSample, SystemInformation,
};

/// Host fields of a snapshot, everything except the web probes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSample {
    pub cpu: CpuSample,
    pub memory: MemorySample,
    pub disk: DiskSample,
    pub network: NetworkSample,
    pub host: SystemInformation,
}

/// Long-lived sampler.
///
/// CPU usage is a delta between two refreshes, so the `System` is kept
/// around between samples. The very first sample refreshes twice.
pub struct MetricSampler {
    system: Mutex<SamplerState>,
}

struct SamplerState {
    system: System,
    primed: bool,
}

impl Default for MetricSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(SamplerState {
                system: System::new(),
                primed: false,
            }),
        }
    }

    /// Take a sample on the blocking pool.
    pub async fn sample(self: &Arc<Self>) -> SystemSample {
        let sampler = Arc::clone(self);
        match tokio::task::spawn_blocking(move || sampler.sample_blocking()).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("sampler task failed: {e}");
                SystemSample::default()
            }
        }
    }

    #[instrument(skip(self))]
    pub fn sample_blocking(&self) -> SystemSample {
        let mut state = self.system.lock();

        state.system.refresh_cpu_usage();
        if !state.primed {
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            state.system.refresh_cpu_usage();
            state.primed = true;
        }
        state.system.refresh_memory();

        let system = &state.system;
        let cpu_count = system.cpus().len();

        let cpu = CpuSample {
            percent: (cpu_count > 0).then(|| f64::from(system.global_cpu_usage())),
            logical_count: (cpu_count > 0).then_some(cpu_count),
        };

        let total_memory = system.total_memory();
        let used_memory = system.used_memory();
        let memory = MemorySample {
            percent: percent_of(used_memory, total_memory),
            total_bytes: (total_memory > 0).then_some(total_memory),
            used_bytes: (total_memory > 0).then_some(used_memory),
        };
        drop(state);

        let sample = SystemSample {
            cpu,
            memory,
            disk: sample_disk(),
            network: sample_network(),
            host: SystemInformation {
                host_name: System::host_name(),
                os_name: System::name(),
                os_version: System::os_version(),
                kernel_version: System::kernel_version(),
                uptime_secs: Some(System::uptime()),
            },
        };

        trace!("sampled system: {sample:?}");
        sample
    }
}

fn percent_of(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| (part as f64 / total as f64) * 100.0)
}

/// Usage of the root filesystem, or the largest disk when there is no `/`
fn sample_disk() -> DiskSample {
    let disks = Disks::new_with_refreshed_list();

    let main = disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .or_else(|| disks.iter().max_by_key(|disk| disk.total_space()));

    let Some(disk) = main else {
        return DiskSample::default();
    };

    let total = disk.total_space();
    let used = total.saturating_sub(disk.available_space());

    DiskSample {
        percent: percent_of(used, total),
        total_bytes: Some(total),
        used_bytes: Some(used),
    }
}

fn sample_network() -> NetworkSample {
    let networks = Networks::new_with_refreshed_list();

    let io = (!networks.is_empty()).then(|| {
        networks
            .iter()
            .fold(NetworkCounters::default(), |mut acc, (_, data)| {
                acc.bytes_sent += data.total_transmitted();
                acc.bytes_recv += data.total_received();
                acc.packets_sent += data.total_packets_transmitted();
                acc.packets_recv += data.total_packets_received();
                acc.errors_in += data.total_errors_on_received();
                acc.errors_out += data.total_errors_on_transmitted();
                acc
            })
    });

    NetworkSample {
        io,
        connection_count: connection_count(),
    }
}

/// Open TCP sockets, IPv4 and IPv6
#[cfg(target_os = "linux")]
fn connection_count() -> Option<u64> {
    let counts: Vec<u64> = ["tcp", "tcp6"]
        .iter()
        .filter_map(|table| std::fs::read_to_string(format!("/proc/net/{table}")).ok())
        .map(|content| socket_entries(&content))
        .collect();

    (!counts.is_empty()).then(|| counts.iter().sum())
}

/// Rows of a `/proc/net/*` socket table, header excluded
#[cfg(target_os = "linux")]
fn socket_entries(table: &str) -> u64 {
    table
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count() as u64
}

#[cfg(not(target_os = "linux"))]
fn connection_count() -> Option<u64> {
    None
}
