//! Response interception pipeline
//!
//! Interceptors say up front, from the request alone, whether they want an
//! exchange ([`ResponseInterceptor::claims`]). Unclaimed exchanges never reach
//! the chain: the client streams them through with the browser's own headers.
//! Claimed ones are buffered, and once complete run through the
//! [`InterceptorChain`], where each interceptor can leave the body alone or
//! hand back a replacement. The status line is never touched.
//!
//! # Architecture
//!
//! ```text
//! upstream response ──► InterceptorChain ──► [Interceptor₁, Interceptor₂, ...] ──► body for the browser
//! ```
//!
//! # Fail-Safe Guarantee
//!
//! The chain ALWAYS returns. An interceptor error is logged and the body it
//! was given continues down the chain unchanged; in the worst case the browser
//! receives exactly the bytes the server sent.

use bytes::Bytes;

// ============================================================================
// Exchange
// ============================================================================

/// What is known about a request before it is sent
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Request method (e.g. "GET")
    pub method: &'a str,

    /// Page the browser was on when it issued the request, if the client said
    pub page_location: Option<&'a str>,

    /// Full upstream URL
    pub url: &'a str,
}

/// What an interceptor may know about a completed request
#[derive(Debug, Clone, Copy)]
pub struct Exchange<'a> {
    /// Request method (e.g. "GET")
    pub method: &'a str,

    /// Page the browser was on when it issued the request, if the client said
    pub page_location: Option<&'a str>,

    /// Full upstream URL the response came from
    pub response_url: &'a str,

    /// Upstream status code
    pub status: u16,
}

impl<'a> Exchange<'a> {
    pub fn completed(target: Target<'a>, status: u16) -> Self {
        Self {
            method: target.method,
            page_location: target.page_location,
            response_url: target.url,
            status,
        }
    }

    pub fn target(&self) -> Target<'a> {
        Target {
            method: self.method,
            page_location: self.page_location,
            url: self.response_url,
        }
    }
}

// ============================================================================
// Intercept Result
// ============================================================================

/// Result of intercepting a response
#[derive(Debug)]
pub enum InterceptResult {
    /// Leave the body as it is
    PassThrough,

    /// Send this body instead
    Replace(Bytes),

    /// Something went wrong - log and continue with the current body
    Error(anyhow::Error),
}

// ============================================================================
// Response Interceptor Trait
// ============================================================================

/// Trait for response interceptors
///
/// Interceptors are called in registration order. `on_complete` is synchronous
/// and may block (it reads the filter store); the client runs it on the
/// blocking pool once the whole body has been read.
///
/// # Fail-Safe Contract
///
/// Implementations return `InterceptResult::Error` rather than panicking.
pub trait ResponseInterceptor: Send + Sync {
    /// Human-readable name for logging and debugging
    fn name(&self) -> &'static str;

    /// Decided before the request is sent. Exchanges no interceptor claims are
    /// streamed through untouched and never buffered.
    fn claims(&self, target: &Target) -> bool;

    /// Cheap check on the completed exchange (status); return `false` to skip
    /// `on_complete`
    fn should_apply(&self, exchange: &Exchange) -> bool;

    /// Inspect the completed response and optionally replace its body
    fn on_complete(&self, exchange: &Exchange, body: &Bytes) -> InterceptResult;
}

// ============================================================================
// Interceptor Chain
// ============================================================================

/// Ordered set of interceptors applied to every exchange
pub struct InterceptorChain {
    interceptors: Vec<Box<dyn ResponseInterceptor>>,
}

impl InterceptorChain {
    /// Create an empty chain (passthrough)
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Register an interceptor
    pub fn register(&mut self, interceptor: impl ResponseInterceptor + 'static) {
        self.interceptors.push(Box::new(interceptor));
    }

    /// Does any interceptor want to see this exchange's body?
    pub fn claims(&self, target: &Target) -> bool {
        self.interceptors.iter().any(|i| i.claims(target))
    }

    /// Run the chain over a completed response
    ///
    /// Returns `None` when no interceptor replaced the body, so the caller can
    /// forward the original bytes untouched.
    pub fn process(&self, exchange: &Exchange, body: &Bytes) -> Option<Bytes> {
        let mut replaced: Option<Bytes> = None;

        let target = exchange.target();

        for interceptor in &self.interceptors {
            if !interceptor.claims(&target) || !interceptor.should_apply(exchange) {
                continue;
            }

            let current = replaced.as_ref().unwrap_or(body);
            match interceptor.on_complete(exchange, current) {
                InterceptResult::PassThrough => {}
                InterceptResult::Replace(new_body) => {
                    tracing::debug!(
                        interceptor = interceptor.name(),
                        method = exchange.method,
                        url = exchange.response_url,
                        before = current.len(),
                        after = new_body.len(),
                        "Response body replaced"
                    );
                    replaced = Some(new_body);
                }
                InterceptResult::Error(error) => {
                    // LOG AND CONTINUE - never break the response
                    tracing::warn!(
                        interceptor = interceptor.name(),
                        url = exchange.response_url,
                        "Interceptor {} failed: {:#}, passing response through",
                        interceptor.name(),
                        error
                    );
                }
            }
        }

        replaced
    }

    /// Check if chain has any interceptors
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Get names of registered interceptors (for logging/debug)
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
