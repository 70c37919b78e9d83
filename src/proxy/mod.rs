// Proxy module - HTTP server that sits between the browser and Octopus Deploy
//
// Every request is forwarded upstream unchanged. Completed responses run
// through the interceptor chain, which rewrites the few environment-listing
// responses the user wants narrowed and passes everything else through
// byte-for-byte.

pub(crate) mod admin;
pub(crate) mod client;
pub(crate) mod env_filter;
mod error;
pub(crate) mod helpers;
pub mod interceptor;
pub(crate) mod page_script;
pub(crate) mod server;

pub use server::start_proxy;

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
};

use crate::store::SharedFilterStore;

use client::{InterceptingClient, UpstreamBody, UpstreamRequest};
use error::ProxyError;

/// Shared state for the proxy server
#[derive(Clone)]
pub struct ProxyState {
    /// Upstream client with the interceptor chain attached
    client: InterceptingClient,
    /// Octopus server URL (no trailing slash)
    upstream_url: String,
    /// Request header carrying the page location
    page_header: String,
    /// Filter expression store, shared with the admin endpoints
    store: SharedFilterStore,
    /// Master switch from config, reported by the admin endpoint
    filter_enabled: bool,
}

/// Main proxy handler - forwards requests upstream and returns the
/// (possibly filtered) response
async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();

    tracing::debug!("Proxying {} {}", method, uri);

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;

    let page_location = helpers::page_location(&headers, &state.page_header);

    let upstream = state
        .client
        .send(UpstreamRequest {
            method: &method,
            url: helpers::forward_url(&state.upstream_url, &uri),
            headers: &headers,
            body: body_bytes,
            page_location: page_location.as_deref(),
        })
        .await?;

    let replaced = matches!(upstream.body, UpstreamBody::Buffered { replaced: true, .. });
    let mut builder = Response::builder().status(upstream.status);

    for (key, value) in upstream.headers.iter() {
        if helpers::is_hop_by_hop(key.as_str()) {
            continue;
        }
        // Length of the original body; hyper recomputes it for a replacement
        if replaced && key == "content-length" {
            continue;
        }
        builder = builder.header(key.as_str(), value.as_bytes().to_vec());
    }

    let body = match upstream.body {
        UpstreamBody::Buffered { bytes, .. } => Body::from(bytes),
        UpstreamBody::Streaming(response) => Body::from_stream(response.bytes_stream()),
    };

    builder
        .body(body)
        .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
