use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use netmon::{
    actors::{CollectorDeps, CollectorSettings, RetentionHandle, Scheduler},
    api::{ApiConfig, ApiState, spawn_api_server},
    config::{self, Config, StorageConfig},
    monitors::{LocalProbe, MetricSampler, NetworkProber, ProbeFactory, SnapshotAssembler},
    query::{HttpGenerator, ModelSession, QueryEngine, TextGenerator},
    registry::{EntityRegistry, MemoryRegistry, ensure_default},
    storage::{MemoryStore, SnapshotStore},
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Retention cleanup cadence
const RETENTION_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON), built-in defaults when omitted
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("netmon", LevelFilter::DEBUG),
        ("netmon_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

struct Storage {
    store: Arc<dyn SnapshotStore>,
    registry: Arc<dyn EntityRegistry>,
    retention_days: Option<u32>,
}

async fn open_storage(config: &StorageConfig) -> anyhow::Result<Storage> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, nothing is persisted");
            Ok(Storage {
                store: Arc::new(MemoryStore::new()),
                registry: Arc::new(MemoryRegistry::new()),
                retention_days: None,
            })
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
        } => {
            use netmon::{registry::sqlite::SqliteRegistry, storage::sqlite::SqliteStore};

            let store = SqliteStore::new(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            let registry = SqliteRegistry::new(store.pool());
            Ok(Storage {
                store: Arc::new(store),
                registry: Arc::new(registry),
                retention_days: Some(*retention_days),
            })
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested but the storage-sqlite feature is disabled")
        }
    }
}

fn model_session(config: &Config) -> anyhow::Result<ModelSession> {
    let generator: Option<Arc<dyn TextGenerator>> = match &config.model {
        Some(model) => {
            info!("language model {} at {}", model.model, model.endpoint);
            Some(Arc::new(HttpGenerator::from_config(model)?))
        }
        None => None,
    };
    Ok(ModelSession::new(generator))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = config::load(args.file.as_deref())?;

    let Storage {
        store,
        registry,
        retention_days,
    } = open_storage(&config.storage).await?;

    let local = ensure_default(registry.as_ref(), config.local_entity.to_entity())
        .await
        .context("failed to register the local entity")?;

    let sampler = Arc::new(MetricSampler::new());
    let prober = Arc::new(NetworkProber::from_config(&config.probes)?);
    let local_probe = Arc::new(LocalProbe::new(sampler, prober));
    let probes = Arc::new(ProbeFactory::new(
        local_probe.clone(),
        Duration::from_secs(config.probes.remote_timeout_secs),
    )?);

    let deps = CollectorDeps {
        assembler: Arc::new(SnapshotAssembler::new()),
        store: store.clone(),
        registry: registry.clone(),
    };
    let settings = CollectorSettings {
        interval: Duration::from_secs(config.interval_secs.max(1)),
        max_backoff: Duration::from_secs(config.max_backoff_secs),
        speed_test_every: config.probes.speed_test.every,
    };
    let scheduler = Arc::new(Scheduler::new(probes, deps, settings));
    let jobs = scheduler.sync_with_registry().await?;
    info!("{jobs} collection jobs, every {}s", config.interval_secs);

    // first local snapshot, so queries have something to answer from
    match scheduler.collect_now(&local.id).await {
        Ok(snapshot) => info!("initial collection at {}", snapshot.timestamp),
        Err(e) => warn!("initial collection failed: {e}"),
    }

    let retention =
        retention_days.map(|days| RetentionHandle::spawn(store.clone(), days, RETENTION_EVERY));

    let model = Arc::new(model_session(&config)?);
    let engine = Arc::new(QueryEngine::new(
        store.clone(),
        registry.clone(),
        model,
        local.id.clone(),
    ));

    let state = ApiState::new(
        store.clone(),
        scheduler.clone(),
        engine,
        local_probe,
        local.id.clone(),
    );
    let addr = spawn_api_server(ApiConfig::from(&config), state).await?;
    info!("netmon hub running on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    scheduler.shutdown().await;
    if let Some(retention) = retention {
        retention.shutdown().await;
    }
    store.close().await?;

    Ok(())
}
