//! Everything that produces measurements
//!
//! - [`sampler`]: local host counters
//! - [`prober`]: network capabilities with provider fallback
//! - [`probe`]: the per-entity `Probe` capability, local or remote
//! - [`assembler`]: stamps measurements into snapshots

pub mod assembler;
pub mod probe;
pub mod prober;
pub mod sampler;

use std::time::Duration;

pub use assembler::SnapshotAssembler;
pub use probe::{CollectRequest, LocalProbe, Probe, ProbeError, ProbeFactory, ProbeSelector, RemoteProbe};
pub use prober::NetworkProber;
pub use sampler::MetricSampler;

/// Why a single provider did not answer. Absorbed by the prober.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("missing input: {0}")]
    MissingInput(&'static str),
}

impl From<reqwest::Error> for ProbeFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeFailure::Request(format!("timed out: {err}"))
        } else if err.is_decode() {
            ProbeFailure::Parse(err.to_string())
        } else {
            ProbeFailure::Request(err.to_string())
        }
    }
}
