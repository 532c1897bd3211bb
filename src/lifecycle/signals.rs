//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//! - Trigger appropriate actions (shutdown, reload)
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second SIGTERM/SIGINT forces exit
//! - SIGHUP triggers config reload, not shutdown

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{load_config, GatewayConfig};
use crate::lifecycle::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

#[cfg(unix)]
async fn next_signal() -> SignalEvent {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to install Unix signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return SignalEvent::Shutdown;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => SignalEvent::Shutdown,
        _ = term.recv() => SignalEvent::Shutdown,
        _ = hup.recv() => SignalEvent::Reload,
    }
}

#[cfg(not(unix))]
async fn next_signal() -> SignalEvent {
    let _ = tokio::signal::ctrl_c().await;
    SignalEvent::Shutdown
}

/// Listen for signals until the process exits.
///
/// Reloads read `config_path` again and go through the same channel as the
/// file watcher.
pub fn spawn_signal_handler(
    shutdown: Arc<Shutdown>,
    config_path: PathBuf,
    updates: mpsc::UnboundedSender<GatewayConfig>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutting_down = false;
        loop {
            match next_signal().await {
                SignalEvent::Shutdown if shutting_down => {
                    tracing::warn!("Second shutdown signal, exiting immediately");
                    std::process::exit(1);
                }
                SignalEvent::Shutdown => {
                    tracing::info!("Shutdown signal received, draining connections");
                    shutting_down = true;
                    shutdown.trigger();
                }
                SignalEvent::Reload => {
                    tracing::info!(path = ?config_path, "SIGHUP received, reloading configuration");
                    match load_config(&config_path) {
                        Ok(config) => {
                            let _ = updates.send(config);
                        }
                        Err(e) => {
                            crate::observability::metrics::record_pipeline_reload("rejected");
                            tracing::error!(error = %e, "Reload rejected, keeping current configuration");
                        }
                    }
                }
            }
        }
    })
}
