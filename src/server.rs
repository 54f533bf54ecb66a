//! Server composition root.
//!
//! Loads configuration, connects the broker, wires the coordination layer
//! onto the event bus, and serves the viewer gateway until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use fluxgate_broker::{Broker, RedisBroker};
use fluxgate_core::{
    BroadcastForwarder, CoordinatorConfig, EventBus, PersistenceForwarder,
    ShutdownController, SourceDiscoveryListener,
};

use crate::websocket::{self, SocketRegistry};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Gateway listen address and drain budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds to wait for tasks to drain after ctrl-c.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_drain_timeout_secs() -> u64 {
    10
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Embedded default configuration (compiled into the binary).
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Load configuration from the embedded defaults, optional local files, and
/// `FLUXGATE_`-prefixed environment variables (highest priority).
pub(crate) fn load_config() -> Result<AppConfig> {
    use config::{Config, Environment, File, FileFormat};

    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name("config/local").required(false))
        .add_source(
            Environment::with_prefix("FLUXGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    viewers: usize,
    sources: Vec<String>,
}

async fn health(
    Extension(registry): Extension<Arc<SocketRegistry>>,
    Extension(broadcast): Extension<Arc<BroadcastForwarder>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        viewers: registry.len(),
        sources: broadcast.known_sources(),
    })
}

/// Run the coordinator and viewer gateway.
pub async fn run() -> Result<()> {
    info!("Starting fluxgate v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    info!("Configuration loaded");

    // Unrecoverable: the coordinator is nothing without its broker.
    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::connect(&config.redis.url)
            .await
            .context("Failed to connect to message broker")?,
    );
    info!(url = %config.redis.url, "Broker connected");

    let bus = Arc::new(EventBus::new());
    let shutdown = ShutdownController::new();

    // Forwarders first: their source-discovered subscriptions must exist
    // before the listener dispatches the first announcement.
    let _persistence = PersistenceForwarder::start(
        bus.clone(),
        broker.clone(),
        config.coordinator.throttle_window(),
        shutdown.token(),
    );
    let broadcast = Arc::new(
        BroadcastForwarder::start(bus.clone(), broker.clone(), shutdown.token())
            .await
            .context("Failed to start broadcast forwarder")?,
    );

    {
        let listener = SourceDiscoveryListener::new(broker.clone(), bus.clone());
        let token = shutdown.token();
        let guard = shutdown.register_task();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = listener.run(token).await {
                error!(error = %e, "discovery listener terminated");
            }
        });
    }

    let registry = Arc::new(SocketRegistry::new());
    websocket::relay::start(broker.clone(), registry.clone(), shutdown.token())
        .await
        .context("Failed to start viewer relays")?;

    let app = Router::new()
        .route("/ws", get(websocket::viewer_handler))
        .route("/health", get(health))
        .layer(Extension(registry))
        .layer(Extension(broker))
        .layer(Extension(broadcast))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Viewer gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown
        .shutdown(Duration::from_secs(config.server.drain_timeout_secs))
        .await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("ctrl-c received, shutting down");
}
