//! Proxy server setup and initialization

use anyhow::{Context, Result};
use axum::{
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::store::SharedFilterStore;

use super::admin;
use super::client::InterceptingClient;
use super::env_filter::EnvironmentFilter;
use super::interceptor::InterceptorChain;
use super::page_script::{self, PageScriptInjector, PAGE_SCRIPT_PATH};
use super::proxy_handler;
use super::ProxyState;

/// Path prefix reserved for the proxy's own endpoints
pub const ADMIN_FILTER_PATH: &str = "/_envfilter/filter";

/// Pooled upstream client; `decompress` only for exchanges that get inspected
fn http_client(config: &Config, decompress: bool) -> Result<reqwest::Client> {
    // No default User-Agent: the browser's own is forwarded.
    // Redirects are handed back to the browser untouched, never followed here.
    let builder = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(10)
        .http1_only()
        .redirect(reqwest::redirect::Policy::none());

    let builder = if decompress { builder } else { builder.no_gzip() };
    builder.build().context("Failed to create HTTP client")
}

/// Build the shared handler state from config
pub(crate) fn build_state(config: &Config, store: SharedFilterStore) -> Result<ProxyState> {
    let mut chain = InterceptorChain::new();
    if config.filter.enabled {
        chain.register(EnvironmentFilter::from_settings(&config.filter, store.clone()));
        if config.filter.inject_page_script {
            chain.register(PageScriptInjector);
        }
    }

    if chain.is_empty() {
        tracing::info!("Environment filtering disabled, proxying responses untouched");
    } else {
        tracing::debug!(
            "Interceptor chain initialized with: {:?}",
            chain.interceptor_names()
        );
    }

    Ok(ProxyState {
        client: InterceptingClient::new(
            http_client(config, true)?,
            http_client(config, false)?,
            chain,
        ),
        upstream_url: config.upstream_url.clone(),
        page_header: config.filter.page_header.clone(),
        store,
        filter_enabled: config.filter.enabled,
    })
}

/// Admin endpoints plus the catch-all proxy handler
pub(crate) fn router(state: ProxyState) -> Router {
    Router::new()
        .route(
            ADMIN_FILTER_PATH,
            get(admin::get_filter).put(admin::put_filter),
        )
        .route(PAGE_SCRIPT_PATH, get(page_script::serve_script))
        .route("/", any(proxy_handler))
        .route("/*path", any(proxy_handler))
        .with_state(state)
}

/// Start the proxy server
pub async fn start_proxy(
    config: Config,
    store: SharedFilterStore,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.bind_addr;
    let state = build_state(&config, store)?;
    let app = router(state);

    tracing::info!("Starting proxy on {} -> {}", bind_addr, config.upstream_url);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Proxy listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}
