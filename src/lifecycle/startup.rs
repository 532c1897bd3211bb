//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics and the first pipeline
//! - Start background tasks (config watcher, reload loop, signals, admin)
//! - Bind the gateway listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when the pipeline is built)
//! - Reload swaps the pipeline only; listener and timeout changes need a restart

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, ConfigError, GatewayConfig, ListenerConfig};
use crate::error::BuildError;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::{logging, metrics};
use crate::pipeline::{self, Pipeline, SharedPipeline};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline: {0}")]
    Build(#[from] BuildError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid address `{0}`")]
    Address(String),
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    for (kind, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} file not found: {:?}", kind, path),
            ));
        }
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

fn parse_addr(value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::Address(value.to_string()))
}

/// Apply every config update to the shared pipeline until the channel closes.
fn spawn_reloader(current: SharedPipeline, mut updates: mpsc::UnboundedReceiver<GatewayConfig>) {
    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            // Failure is logged and counted inside; the old pipeline keeps serving.
            let _ = pipeline::reload(&current, &config);
        }
    });
}

async fn spawn_admin(config: &GatewayConfig, current: SharedPipeline, shutdown: &Shutdown) -> Result<(), StartupError> {
    let listener = TcpListener::bind(parse_addr(&config.admin.bind_address)?).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let app = setup_admin_router(AdminState::new(current, &config.admin.api_key));
    let stop = shutdown.wait();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
            tracing::error!(error = %e, "Admin API stopped with error");
        }
    });
    Ok(())
}

async fn serve(server: HttpServer, listener: &ListenerConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    let addr = parse_addr(&listener.bind_address)?;
    match &listener.tls {
        Some(tls) => {
            let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
            let handle = axum_server::Handle::new();
            let stop = shutdown.wait();
            let drain = handle.clone();
            tokio::spawn(async move {
                stop.await;
                drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
            });
            server.run_tls(addr, rustls, handle).await?;
        }
        None => {
            let tcp = TcpListener::bind(addr).await?;
            server.run(tcp, shutdown.wait()).await?;
        }
    }
    Ok(())
}

/// Boot the gateway from `config_path` and serve until a shutdown signal.
pub async fn run(config_path: &Path) -> Result<(), StartupError> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        "api-gateway starting"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(parse_addr(&config.observability.metrics_address)?);
    }

    let current = pipeline::shared(Pipeline::from_config(&config)?);
    let shutdown = Arc::new(Shutdown::new());

    let (watcher, updates) = ConfigWatcher::new(config_path);
    let signal_updates = watcher.sender();
    let _watcher = watcher.run()?;
    spawn_reloader(current.clone(), updates);
    signals::spawn_signal_handler(shutdown.clone(), config_path.to_path_buf(), signal_updates);

    if config.admin.enabled {
        spawn_admin(&config, current.clone(), &shutdown).await?;
    }

    let server = HttpServer::new(&config, current.clone());
    serve(server, &config.listener, &shutdown).await?;

    current.load().close();
    tracing::info!("Shutdown complete");
    Ok(())
}
