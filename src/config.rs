use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, trace};

use crate::registry::{EntityKind, EntityStatus, MonitoredEntity};
use crate::util;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (snapshots older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./netmon.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Seconds between scheduled collections
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Upper bound for the failure backoff
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub probes: ProbeConfig,

    /// Generative model used to reword answers (optional)
    pub model: Option<ModelConfig>,

    #[serde(default)]
    pub local_entity: LocalEntityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_backoff_secs: default_max_backoff(),
            storage: StorageConfig::default(),
            api: ApiSettings::default(),
            probes: ProbeConfig::default(),
            model: None,
            local_entity: LocalEntityConfig::default(),
        }
    }
}

fn default_interval() -> u64 {
    120
}

fn default_max_backoff() -> u64 {
    900
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    /// Overrides `NETMON_ADDR`/`NETMON_PORT`
    pub bind: Option<SocketAddr>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: None,
            enable_cors: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    /// Per-provider timeout for IP and VPN lookups
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,

    /// Public-IP echo services, tried in order
    #[serde(default = "default_ip_providers")]
    pub ip_providers: Vec<String>,

    /// Geo-IP lookup used for VPN detection, `{ip}` is substituted
    #[serde(default = "default_geo_ip_url")]
    pub geo_ip_url: Option<String>,

    /// Country the host is expected to appear in without a VPN
    #[serde(default = "default_expected_country")]
    pub expected_country: Option<String>,

    /// Fall back to looking for tunnel interfaces
    #[serde(default = "default_true")]
    pub interface_vpn_detection: bool,

    #[serde(default)]
    pub speed_test: SpeedTestConfig,

    /// Remote report timeout
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            ip_providers: default_ip_providers(),
            geo_ip_url: default_geo_ip_url(),
            expected_country: default_expected_country(),
            interface_vpn_detection: true,
            speed_test: SpeedTestConfig::default(),
            remote_timeout_secs: default_remote_timeout_secs(),
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_ip_providers() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://icanhazip.com".to_string(),
        "https://ifconfig.me/ip".to_string(),
    ]
}

fn default_geo_ip_url() -> Option<String> {
    Some("https://ipinfo.io/{ip}/json".to_string())
}

fn default_expected_country() -> Option<String> {
    Some("TR".to_string())
}

fn default_remote_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SpeedTestConfig {
    #[serde(default = "default_download_url")]
    pub download_url: Option<String>,

    #[serde(default = "default_upload_url")]
    pub upload_url: Option<String>,

    #[serde(default = "default_upload_bytes")]
    pub upload_bytes: usize,

    #[serde(default = "default_speed_test_timeout")]
    pub timeout_secs: u64,

    /// Scheduled runs include a speed test every N ticks, 0 disables it
    #[serde(default = "default_speed_test_every")]
    pub every: u32,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            download_url: default_download_url(),
            upload_url: default_upload_url(),
            upload_bytes: default_upload_bytes(),
            timeout_secs: default_speed_test_timeout(),
            every: default_speed_test_every(),
        }
    }
}

fn default_download_url() -> Option<String> {
    Some("https://speed.cloudflare.com/__down?bytes=10000000".to_string())
}

fn default_upload_url() -> Option<String> {
    Some("https://speed.cloudflare.com/__up".to_string())
}

fn default_upload_bytes() -> usize {
    2_000_000
}

fn default_speed_test_timeout() -> u64 {
    60
}

fn default_speed_test_every() -> u32 {
    4
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ModelConfig {
    /// Base URL of an Ollama-compatible server
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_model_timeout() -> u64 {
    60
}

/// The entity that always exists: this host
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LocalEntityConfig {
    #[serde(default = "default_local_id")]
    pub id: String,
    #[serde(default = "default_local_name")]
    pub name: String,
    #[serde(default = "default_local_address")]
    pub address: String,
    #[serde(default = "default_local_description")]
    pub description: String,
    /// Whether collection starts with the hub
    #[serde(default)]
    pub monitoring_enabled: bool,
}

impl Default for LocalEntityConfig {
    fn default() -> Self {
        Self {
            id: default_local_id(),
            name: default_local_name(),
            address: default_local_address(),
            description: default_local_description(),
            monitoring_enabled: false,
        }
    }
}

fn default_local_id() -> String {
    "localhost".to_string()
}

fn default_local_name() -> String {
    "Local machine".to_string()
}

fn default_local_address() -> String {
    "127.0.0.1".to_string()
}

fn default_local_description() -> String {
    "The machine running the hub".to_string()
}

impl LocalEntityConfig {
    pub fn to_entity(&self) -> MonitoredEntity {
        let now = Utc::now();
        MonitoredEntity {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            description: self.description.clone(),
            kind: EntityKind::Local,
            monitoring_enabled: self.monitoring_enabled,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
            last_seen: None,
        }
    }
}

impl Config {
    /// Address the API binds to: config file first, then the environment.
    pub fn bind_addr(&self) -> SocketAddr {
        self.api
            .bind
            .unwrap_or_else(|| SocketAddr::new(util::get_addr().into(), util::get_port()))
    }

    /// Apply environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(interval) = util::get_interval_override() {
            debug!("collection interval overridden from environment: {interval}s");
            self.interval_secs = interval;
        }
        self
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Read the config file if one was given, fall back to defaults otherwise.
pub fn load(path: Option<&str>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    Ok(config.with_env_overrides())
}
