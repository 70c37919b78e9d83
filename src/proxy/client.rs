//! Upstream client with response interception
//!
//! Wraps two pooled `reqwest` clients and the [`InterceptorChain`]. Whether an
//! exchange is intercepted is decided from the request alone, before it is
//! sent:
//!
//! - unclaimed: sent on the raw client with the browser's headers as they are
//!   (including `accept-encoding`), and the body is streamed back undecoded
//! - claimed: `accept-encoding` is left to the decoding client so the body
//!   arrives as plain text; it is buffered and run through the chain on the
//!   blocking pool, since interceptors read the filter store from disk

use std::sync::Arc;

use axum::http::{header, HeaderMap, Method};
use bytes::Bytes;

use super::error::ProxyError;
use super::helpers::is_request_managed;
use super::interceptor::{Exchange, InterceptorChain, Target};

/// A request to forward upstream
pub(crate) struct UpstreamRequest<'a> {
    pub method: &'a Method,
    pub url: String,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
    pub page_location: Option<&'a str>,
}

#[derive(Debug)]
pub(crate) enum UpstreamBody {
    /// Complete body of a claimed exchange
    Buffered {
        bytes: Bytes,
        /// An interceptor replaced the body; stale length headers must go
        replaced: bool,
    },
    /// Unclaimed exchange, passed on as it arrives
    Streaming(reqwest::Response),
}

/// A completed upstream exchange, after interception
#[derive(Debug)]
pub(crate) struct UpstreamResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: UpstreamBody,
}

#[derive(Clone)]
pub(crate) struct InterceptingClient {
    /// gzip-decoding client for claimed exchanges
    decoding: reqwest::Client,
    /// Client without automatic decompression for everything else
    raw: reqwest::Client,
    chain: Arc<InterceptorChain>,
}

impl InterceptingClient {
    pub fn new(decoding: reqwest::Client, raw: reqwest::Client, chain: InterceptorChain) -> Self {
        Self {
            decoding,
            raw,
            chain: Arc::new(chain),
        }
    }

    /// Forward a request and run the interceptor chain over the response
    pub async fn send(&self, request: UpstreamRequest<'_>) -> Result<UpstreamResponse, ProxyError> {
        let target = Target {
            method: request.method.as_str(),
            page_location: request.page_location,
            url: &request.url,
        };
        let claimed = self.chain.claims(&target);

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ProxyError::Upstream(format!("Invalid HTTP method: {}", e)))?;

        let client = if claimed { &self.decoding } else { &self.raw };
        let mut forward_req = client.request(method, &request.url).body(request.body);

        for (key, value) in request.headers.iter() {
            if is_request_managed(key.as_str()) {
                continue;
            }
            // Claimed bodies must come back in an encoding the client decodes
            if claimed && key == header::ACCEPT_ENCODING {
                continue;
            }
            forward_req = forward_req.header(key.as_str(), value.as_bytes().to_vec());
        }

        let response = forward_req
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();

        if !claimed {
            return Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Streaming(response),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::BodyRead(e.to_string()))?;

        let (bytes, replaced) = self.run_chain(target, status, bytes).await;

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Buffered { bytes, replaced },
        })
    }

    /// Run the chain on the blocking pool; the original body on any failure
    async fn run_chain(&self, target: Target<'_>, status: u16, body: Bytes) -> (Bytes, bool) {
        let chain = Arc::clone(&self.chain);
        let method = target.method.to_string();
        let page_location = target.page_location.map(String::from);
        let url = target.url.to_string();
        let input = body.clone();

        let processed = tokio::task::spawn_blocking(move || {
            let target = Target {
                method: &method,
                page_location: page_location.as_deref(),
                url: &url,
            };
            chain.process(&Exchange::completed(target, status), &input)
        })
        .await;

        match processed {
            Ok(Some(replacement)) => (replacement, true),
            Ok(None) => (body, false),
            Err(e) => {
                tracing::warn!("Interceptor chain aborted: {}, passing response through", e);
                (body, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::interceptor::{InterceptResult, ResponseInterceptor};
    use axum::{routing::get, Router};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Blocks in `on_complete` until an async task on the test runtime answers
    struct WaitsForRuntime {
        started: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ResponseInterceptor for WaitsForRuntime {
        fn name(&self) -> &'static str {
            "waits-for-runtime"
        }
        fn claims(&self, _target: &Target) -> bool {
            true
        }
        fn should_apply(&self, _exchange: &Exchange) -> bool {
            true
        }
        fn on_complete(&self, _exchange: &Exchange, _body: &Bytes) -> InterceptResult {
            if let Some(started) = self.started.lock().unwrap().take() {
                let _ = started.send(());
            }
            match self.release.lock().unwrap().recv_timeout(Duration::from_secs(5)) {
                Ok(()) => InterceptResult::Replace(Bytes::from_static(b"released")),
                Err(_) => InterceptResult::PassThrough,
            }
        }
    }

    async fn upstream() -> String {
        let app = Router::new().route("/api/environments/all", get(|| async { "[]" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/environments/all", addr)
    }

    #[tokio::test]
    async fn test_chain_does_not_block_the_runtime() {
        let url = upstream().await;

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let mut chain = InterceptorChain::new();
        chain.register(WaitsForRuntime {
            started: Mutex::new(Some(started_tx)),
            release: Mutex::new(release_rx),
        });
        let client = InterceptingClient::new(reqwest::Client::new(), reqwest::Client::new(), chain);

        // Single-threaded test runtime: this task can only answer while
        // on_complete is blocked if on_complete runs somewhere else
        tokio::spawn(async move {
            if started_rx.await.is_ok() {
                let _ = release_tx.send(());
            }
        });

        let headers = HeaderMap::new();
        let response = client
            .send(UpstreamRequest {
                method: &Method::GET,
                url,
                headers: &headers,
                body: Bytes::new(),
                page_location: None,
            })
            .await
            .unwrap();

        match response.body {
            UpstreamBody::Buffered { bytes, replaced } => {
                assert!(replaced);
                assert_eq!(&bytes[..], b"released");
            }
            other => panic!("Expected Buffered, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unclaimed_exchange_is_streamed() {
        let url = upstream().await;
        let client = InterceptingClient::new(
            reqwest::Client::new(),
            reqwest::Client::new(),
            InterceptorChain::new(),
        );

        let headers = HeaderMap::new();
        let response = client
            .send(UpstreamRequest {
                method: &Method::GET,
                url,
                headers: &headers,
                body: Bytes::new(),
                page_location: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        match response.body {
            UpstreamBody::Streaming(inner) => assert_eq!(inner.text().await.unwrap(), "[]"),
            other => panic!("Expected Streaming, got {:?}", other),
        }
    }
}
