// octo-envfilter - Environment filtering proxy for Octopus Deploy
//
// Sits between the browser and an Octopus Deploy server. Responses that list
// environments for the project overview and the infrastructure pages are
// narrowed to the environments matching a user-defined expression; every
// other request passes through unchanged.
//
// Architecture:
// - Proxy server (axum): forwards browser traffic to Octopus
// - Interceptor chain: inspects completed responses before the browser sees them
// - Filter: classifies exchanges and prunes environment lists
// - Store: holds the filter expression, re-read on every filtered response

mod cli;
mod config;
mod filter;
mod proxy;
mod startup;
mod store;

use anyhow::Result;
use config::{Config, LogRotation, LoggingConfig};
use std::sync::Arc;
use store::{FileFilterStore, SharedFilterStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first (config ..., filter ...)
    // If a command was handled, exit early
    if cli::handle_cli() {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = Config::from_env()?;

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = init_tracing(&config.logging);

    let store = FileFilterStore::new(config.filter.store_path.clone());
    if let Err(e) = store.ensure_exists() {
        tracing::warn!("Could not create filter store: {:#}", e);
    }

    startup::print_startup(&config, &store);
    startup::log_startup(&config, &store);

    // Oneshot channel for graceful proxy shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let shared_store: SharedFilterStore = Arc::new(store);
    let proxy_config = config.clone();
    let mut proxy_handle = tokio::spawn(async move {
        proxy::start_proxy(proxy_config, shared_store, shutdown_rx).await
    });

    tokio::select! {
        result = &mut proxy_handle => {
            // Server stopped on its own (bind failure, fatal error)
            return match result {
                Ok(inner) => inner,
                Err(e) => Err(e.into()),
            };
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
        }
    }

    tracing::info!("Shutting down...");

    // If the send fails, the proxy has already shut down (which is fine)
    let _ = shutdown_tx.send(());

    match proxy_handle.await {
        Ok(Err(e)) => tracing::error!("Proxy error during shutdown: {:#}", e),
        Err(e) => tracing::error!("Proxy task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing: stdout always, JSON file layer when enabled
///
/// Precedence: RUST_LOG env var > config file > default "info"
fn init_tracing(logging: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = format!(
        "octo_envfilter={},tower_http=debug,axum=debug",
        logging.level
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if !logging.file_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(&logging.file_dir) {
        eprintln!(
            "Warning: Could not create log directory {:?}: {}",
            logging.file_dir, e
        );
        // Fall back to non-file logging
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return None;
    }

    let file_appender = match logging.file_rotation {
        LogRotation::Hourly => {
            tracing_appender::rolling::hourly(&logging.file_dir, &logging.file_prefix)
        }
        LogRotation::Daily => {
            tracing_appender::rolling::daily(&logging.file_dir, &logging.file_prefix)
        }
        LogRotation::Never => {
            tracing_appender::rolling::never(&logging.file_dir, &logging.file_prefix)
        }
    };

    // Writes happen on a background thread
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer uses JSON format for structured log parsing
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Some(guard)
}
