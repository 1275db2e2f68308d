//! Network capabilities resolved through ordered provider lists
//!
//! Each capability (public IP, VPN state, speed test) has providers that are
//! tried in order, each bounded by a timeout. The first success wins; every
//! failure before it is recorded in the capability's [`ProbeOutcome`]. A
//! capability where every provider failed yields `None` and never aborts the
//! snapshot.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::Networks;
use tracing::{debug, instrument, warn};

use super::ProbeFailure;
use crate::config::ProbeConfig;
use crate::{Capability, FailedAttempt, ProbeOutcome, VpnStatus, WebSample};

/// Anything that can be tried as part of a fallback chain
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
}

#[async_trait]
pub trait PublicIpProvider: Provider {
    async fn lookup(&self) -> Result<IpAddr, ProbeFailure>;
}

#[async_trait]
pub trait VpnDetector: Provider {
    /// `public_ip` is what the IP capability resolved in the same probe run
    async fn detect(&self, public_ip: Option<IpAddr>) -> Result<VpnStatus, ProbeFailure>;
}

#[async_trait]
pub trait SpeedTestProvider: Provider {
    async fn measure(&self) -> Result<SpeedSample, ProbeFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    pub download_mbps: f64,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
}

/// Try `providers` in order until one answers within `timeout`.
pub async fn first_success<P, T, F, Fut>(
    capability: Capability,
    providers: &[Arc<P>],
    timeout: Duration,
    mut call: F,
) -> (Option<T>, ProbeOutcome)
where
    P: Provider + ?Sized,
    F: FnMut(Arc<P>) -> Fut,
    Fut: Future<Output = Result<T, ProbeFailure>>,
{
    let mut failures = Vec::new();

    for provider in providers {
        let name = provider.name().to_string();

        let failure = match tokio::time::timeout(timeout, call(Arc::clone(provider))).await {
            Ok(Ok(value)) => {
                if !failures.is_empty() {
                    warn!(%capability, provider = %name, "answered by fallback provider");
                }
                return (Some(value), ProbeOutcome::answered(name, failures));
            }
            Ok(Err(failure)) => failure,
            Err(_) => ProbeFailure::Timeout(timeout),
        };

        debug!(%capability, provider = %name, "provider failed: {failure}");
        failures.push(FailedAttempt {
            provider: name,
            reason: failure.to_string(),
        });
    }

    warn!(%capability, "all {} providers failed", failures.len());
    (None, ProbeOutcome::unavailable(failures))
}

pub struct NetworkProber {
    ip_providers: Vec<Arc<dyn PublicIpProvider>>,
    vpn_detectors: Vec<Arc<dyn VpnDetector>>,
    speed_tests: Vec<Arc<dyn SpeedTestProvider>>,
    timeout: Duration,
    speed_test_timeout: Duration,
}

impl NetworkProber {
    pub fn new(timeout: Duration, speed_test_timeout: Duration) -> Self {
        Self {
            ip_providers: Vec::new(),
            vpn_detectors: Vec::new(),
            speed_tests: Vec::new(),
            timeout,
            speed_test_timeout,
        }
    }

    pub fn with_ip_provider(mut self, provider: Arc<dyn PublicIpProvider>) -> Self {
        self.ip_providers.push(provider);
        self
    }

    pub fn with_vpn_detector(mut self, detector: Arc<dyn VpnDetector>) -> Self {
        self.vpn_detectors.push(detector);
        self
    }

    pub fn with_speed_test(mut self, provider: Arc<dyn SpeedTestProvider>) -> Self {
        self.speed_tests.push(provider);
        self
    }

    /// Build the provider chains described by the configuration.
    pub fn from_config(config: &ProbeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("netmon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut prober = Self::new(
            Duration::from_millis(config.timeout_ms),
            Duration::from_secs(config.speed_test.timeout_secs),
        );

        for url in &config.ip_providers {
            prober = prober.with_ip_provider(Arc::new(HttpIpProvider::new(client.clone(), url)));
        }

        if let Some(url) = &config.geo_ip_url {
            prober = prober.with_vpn_detector(Arc::new(GeoIpVpnDetector::new(
                client.clone(),
                url,
                config.expected_country.clone(),
            )));
        }

        if config.interface_vpn_detection {
            prober = prober.with_vpn_detector(Arc::new(InterfaceVpnDetector));
        }

        if let Some(url) = &config.speed_test.download_url {
            prober = prober.with_speed_test(Arc::new(HttpSpeedTest::new(
                client,
                url,
                config.speed_test.upload_url.clone(),
                config.speed_test.upload_bytes,
            )));
        }

        Ok(prober)
    }

    /// Resolve every capability. The speed test is only run when requested.
    #[instrument(skip(self))]
    pub async fn probe(&self, include_speed_test: bool) -> WebSample {
        let mut web = WebSample::default();

        if !self.ip_providers.is_empty() {
            let (ip, outcome) = first_success(
                Capability::PublicIp,
                &self.ip_providers,
                self.timeout,
                |provider| async move { provider.lookup().await },
            )
            .await;
            web.public_ip = ip;
            web.probes.insert(Capability::PublicIp, outcome);
        }

        if !self.vpn_detectors.is_empty() {
            let public_ip = web.public_ip;
            let (status, outcome) = first_success(
                Capability::VpnState,
                &self.vpn_detectors,
                self.timeout,
                |detector| async move { detector.detect(public_ip).await },
            )
            .await;
            web.vpn_status = status;
            web.probes.insert(Capability::VpnState, outcome);
        }

        if include_speed_test && !self.speed_tests.is_empty() {
            let (speed, outcome) = first_success(
                Capability::SpeedTest,
                &self.speed_tests,
                self.speed_test_timeout,
                |provider| async move { provider.measure().await },
            )
            .await;
            if let Some(speed) = speed {
                web.download_mbps = Some(speed.download_mbps);
                web.upload_mbps = speed.upload_mbps;
                web.ping_ms = speed.ping_ms;
            }
            web.probes.insert(Capability::SpeedTest, outcome);
        }

        web
    }
}

/// Plain-text (or `{"ip": ...}`) public-IP echo service
pub struct HttpIpProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpIpProvider {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl Provider for HttpIpProvider {
    fn name(&self) -> &str {
        &self.url
    }
}

#[derive(Deserialize)]
struct IpEcho {
    ip: String,
}

#[async_trait]
impl PublicIpProvider for HttpIpProvider {
    async fn lookup(&self) -> Result<IpAddr, ProbeFailure> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let body = body.trim();
        body.parse::<IpAddr>()
            .ok()
            .or_else(|| {
                serde_json::from_str::<IpEcho>(body)
                    .ok()
                    .and_then(|echo| echo.ip.trim().parse().ok())
            })
            .ok_or_else(|| ProbeFailure::Parse(format!("not an IP address: {body:.64}")))
    }
}

/// Geo-IP lookup: a country other than the expected one, or an ISP
/// organisation that looks like a hosting or VPN provider, means VPN on.
pub struct GeoIpVpnDetector {
    client: reqwest::Client,
    /// `{ip}` is replaced by the resolved public IP
    url_template: String,
    expected_country: Option<String>,
}

const VPN_ORG_KEYWORDS: &[&str] = &["vpn", "hosting", "datacenter", "proxy", "cloud", "tor"];

#[derive(Debug, Deserialize)]
struct GeoIpInfo {
    country: Option<String>,
    org: Option<String>,
}

impl GeoIpVpnDetector {
    pub fn new(
        client: reqwest::Client,
        url_template: impl Into<String>,
        expected_country: Option<String>,
    ) -> Self {
        Self {
            client,
            url_template: url_template.into(),
            expected_country,
        }
    }

    fn verdict(&self, info: &GeoIpInfo) -> VpnStatus {
        if let (Some(expected), Some(country)) = (&self.expected_country, &info.country) {
            if !expected.eq_ignore_ascii_case(country) {
                return VpnStatus::On;
            }
        }

        let org = info.org.as_deref().unwrap_or_default().to_lowercase();
        let suspicious = org
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| VPN_ORG_KEYWORDS.contains(&word));

        if suspicious {
            VpnStatus::On
        } else {
            VpnStatus::Off
        }
    }
}

impl Provider for GeoIpVpnDetector {
    fn name(&self) -> &str {
        "geo-ip"
    }
}

#[async_trait]
impl VpnDetector for GeoIpVpnDetector {
    async fn detect(&self, public_ip: Option<IpAddr>) -> Result<VpnStatus, ProbeFailure> {
        let ip = public_ip.ok_or(ProbeFailure::MissingInput("public IP"))?;
        let url = self.url_template.replace("{ip}", &ip.to_string());

        let info: GeoIpInfo = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("geo-ip lookup: {info:?}");
        Ok(self.verdict(&info))
    }
}

/// Looks for tunnel interfaces on this host
pub struct InterfaceVpnDetector;

const TUNNEL_PREFIXES: &[&str] = &["tun", "tap", "wg", "ppp", "utun", "ipsec", "nordlynx"];

pub fn is_tunnel_interface(name: &str) -> bool {
    let name = name.to_lowercase();
    TUNNEL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

impl Provider for InterfaceVpnDetector {
    fn name(&self) -> &str {
        "interfaces"
    }
}

#[async_trait]
impl VpnDetector for InterfaceVpnDetector {
    async fn detect(&self, _public_ip: Option<IpAddr>) -> Result<VpnStatus, ProbeFailure> {
        let names = tokio::task::spawn_blocking(|| {
            Networks::new_with_refreshed_list()
                .keys()
                .cloned()
                .collect::<Vec<String>>()
        })
        .await
        .map_err(|e| ProbeFailure::Request(e.to_string()))?;

        if names.iter().any(|name| is_tunnel_interface(name)) {
            Ok(VpnStatus::On)
        } else {
            Ok(VpnStatus::Off)
        }
    }
}

/// Downloads a sized payload (and optionally uploads one) and times it
pub struct HttpSpeedTest {
    client: reqwest::Client,
    download_url: String,
    upload_url: Option<String>,
    upload_bytes: usize,
}

impl HttpSpeedTest {
    pub fn new(
        client: reqwest::Client,
        download_url: impl Into<String>,
        upload_url: Option<String>,
        upload_bytes: usize,
    ) -> Self {
        Self {
            client,
            download_url: download_url.into(),
            upload_url,
            upload_bytes,
        }
    }
}

fn mbps(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(1e-6);
    (bytes as f64 * 8.0) / secs / 1_000_000.0
}

impl Provider for HttpSpeedTest {
    fn name(&self) -> &str {
        &self.download_url
    }
}

#[async_trait]
impl SpeedTestProvider for HttpSpeedTest {
    async fn measure(&self) -> Result<SpeedSample, ProbeFailure> {
        let started = Instant::now();
        let response = self
            .client
            .get(&self.download_url)
            .send()
            .await?
            .error_for_status()?;
        let ping_ms = started.elapsed().as_secs_f64() * 1000.0;

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(ProbeFailure::Parse("empty download payload".to_string()));
        }
        let download_mbps = mbps(body.len(), started.elapsed());

        let upload_mbps = match &self.upload_url {
            Some(url) if self.upload_bytes > 0 => {
                let payload = vec![0u8; self.upload_bytes];
                let started = Instant::now();
                self.client
                    .post(url)
                    .body(payload)
                    .send()
                    .await?
                    .error_for_status()?;
                Some(mbps(self.upload_bytes, started.elapsed()))
            }
            _ => None,
        };

        Ok(SpeedSample {
            download_mbps,
            upload_mbps,
            ping_ms: Some(ping_ms),
        })
    }
}
