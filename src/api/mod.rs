//! REST API for the monitoring hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Shared handles** to the store, registry, scheduler and query engine
//! - Typed errors rendered as `{"error", "kind"}` JSON bodies
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Store connectivity
//! - `GET /api/system-info` - Host fields of the latest local snapshot
//! - `GET /api/latest-data` - Most recent snapshots
//! - `GET /api/status` - Collection job status
//! - `POST /api/collect-data` - Collect the local entity now
//! - `POST /api/start-monitoring`, `POST /api/stop-monitoring`
//! - `GET /api/report` - This host's measurements, for other hubs
//! - `GET|POST /api/servers`, `DELETE /api/servers/{id}`
//! - `POST /api/servers/{id}/collect`, `GET /api/servers/{id}/data`
//! - `POST /api/query` - Natural-language question
//! - `GET /api/model-status`, `POST /api/init-model`

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

use crate::config::Config;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8000")
    pub bind_addr: SocketAddr,

    /// Enable CORS for browser dashboards
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            enable_cors: true,
        }
    }
}

impl From<&Config> for ApiConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.bind_addr(),
            enable_cors: config.api.enable_cors,
        }
    }
}

/// Build the router with every route and layer.
#[cfg(feature = "api")]
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/system-info", get(routes::monitoring::system_info))
        .route("/api/latest-data", get(routes::monitoring::latest_data))
        .route("/api/status", get(routes::monitoring::status))
        .route("/api/collect-data", post(routes::monitoring::collect_data))
        .route(
            "/api/start-monitoring",
            post(routes::monitoring::start_monitoring),
        )
        .route(
            "/api/stop-monitoring",
            post(routes::monitoring::stop_monitoring),
        )
        .route("/api/report", get(routes::monitoring::report))
        .route(
            "/api/servers",
            get(routes::servers::list_servers).post(routes::servers::create_server),
        )
        .route("/api/servers/:id", delete(routes::servers::delete_server))
        .route(
            "/api/servers/:id/collect",
            post(routes::servers::collect_server),
        )
        .route("/api/servers/:id/data", get(routes::servers::server_data))
        .route("/api/query", post(routes::query::query))
        .route("/api/model-status", get(routes::query::model_status))
        .route("/api/init-model", post(routes::query::init_model))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
