use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::prober::NetworkProber;
use super::sampler::{MetricSampler, SystemSample};
use crate::Measurements;
use crate::registry::{EntityKind, MonitoredEntity};
use crate::storage::schema::normalize_document;

/// Options for one collection run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectRequest {
    #[serde(default)]
    pub include_speed_test: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("remote entity at {address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("remote entity at {address} sent an invalid report: {reason}")]
    InvalidReport { address: String, reason: String },
}

/// Produces the measurements for one entity.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn collect(&self, request: CollectRequest) -> Result<Measurements, ProbeError>;
}

/// Picks the probe for an entity.
pub trait ProbeSelector: Send + Sync {
    fn probe_for(&self, entity: &MonitoredEntity) -> Arc<dyn Probe>;
}

/// Samples this host and runs the network probes.
pub struct LocalProbe {
    sampler: Arc<MetricSampler>,
    prober: Arc<NetworkProber>,
}

impl LocalProbe {
    pub fn new(sampler: Arc<MetricSampler>, prober: Arc<NetworkProber>) -> Self {
        Self { sampler, prober }
    }

    /// Host counters only, no network probes.
    pub async fn system(&self) -> SystemSample {
        self.sampler.sample().await
    }

    /// Host counters and network probes, run concurrently.
    pub async fn report(&self, request: CollectRequest) -> Measurements {
        let (system, web) = tokio::join!(
            self.sampler.sample(),
            self.prober.probe(request.include_speed_test)
        );

        Measurements {
            cpu: system.cpu,
            memory: system.memory,
            disk: system.disk,
            network: system.network,
            web,
            host: system.host,
        }
    }
}

#[async_trait]
impl Probe for LocalProbe {
    async fn collect(&self, request: CollectRequest) -> Result<Measurements, ProbeError> {
        Ok(self.report(request).await)
    }
}

/// Asks a remote entity for its own report over `GET /api/report`.
pub struct RemoteProbe {
    client: reqwest::Client,
    address: String,
    report_url: String,
}

/// `host:port` gets an `http://` scheme, full URLs are used as-is.
pub fn report_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{address}/api/report")
    } else {
        format!("http://{address}/api/report")
    }
}

impl RemoteProbe {
    pub fn new(client: reqwest::Client, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            client,
            report_url: report_url(&address),
            address,
        }
    }

    fn unreachable(&self, err: impl std::fmt::Display) -> ProbeError {
        ProbeError::Unreachable {
            address: self.address.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Probe for RemoteProbe {
    #[instrument(skip(self), fields(address = %self.address))]
    async fn collect(&self, request: CollectRequest) -> Result<Measurements, ProbeError> {
        let response = self
            .client
            .get(&self.report_url)
            .query(&[("speed_test", request.include_speed_test)])
            .send()
            .await
            .map_err(|e| self.unreachable(e))?
            .error_for_status()
            .map_err(|e| self.unreachable(e))?;

        let document: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ProbeError::InvalidReport {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })?;

        if let Ok(measurements) = serde_json::from_value::<Measurements>(document.clone()) {
            return Ok(measurements);
        }

        // older agents report in one of the legacy document shapes
        debug!("normalizing legacy report");
        normalize_document(&document, &self.address, Some(Utc::now()))
            .map(Measurements::from)
            .map_err(|e| ProbeError::InvalidReport {
                address: self.address.clone(),
                reason: e.to_string(),
            })
    }
}

/// Dispatches on `MonitoredEntity::kind`.
pub struct ProbeFactory {
    local: Arc<LocalProbe>,
    client: reqwest::Client,
}

impl ProbeFactory {
    pub fn new(local: Arc<LocalProbe>, remote_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(remote_timeout).build()?;
        Ok(Self { local, client })
    }
}

impl ProbeSelector for ProbeFactory {
    fn probe_for(&self, entity: &MonitoredEntity) -> Arc<dyn Probe> {
        match entity.kind {
            EntityKind::Local => self.local.clone() as Arc<dyn Probe>,
            EntityKind::Remote => Arc::new(RemoteProbe::new(self.client.clone(), &entity.address)),
        }
    }
}
