//! Environment filtering engine
//!
//! Everything needed to decide whether an Octopus response should be rewritten
//! and to rewrite it:
//!
//! ```text
//! stored expression ──► patterns::compile ──► FilterPatterns
//!                                                  │
//! (page, response url) ──► classify ──► ShapeKind ─┴─► transform ──► filtered JSON
//! ```
//!
//! All functions here are pure. The proxy's interceptor owns the side effects
//! (reading the store, logging, replacing the body).

pub mod classify;
pub mod patterns;
pub mod transform;

pub use classify::{classify, ShapeKind};
pub use patterns::{compile, compile_lenient, FilterPatterns};
pub use transform::{transform, FilterOutcome};

use thiserror::Error;

/// Errors raised while compiling patterns or rewriting a response.
///
/// Neither kind ever reaches the browser: the interceptor logs it and lets the
/// original response through.
#[derive(Debug, Error)]
pub enum FilterError {
    /// A comma-separated fragment of the filter expression is not a valid regex
    #[error("invalid environment pattern {fragment:?}: {source}")]
    InvalidPattern {
        fragment: String,
        #[source]
        source: regex::Error,
    },

    /// The response body does not have the shape its endpoint promised
    #[error("malformed {shape} response: {reason}")]
    MalformedResponse { shape: ShapeKind, reason: String },
}

impl FilterError {
    pub(crate) fn malformed(shape: ShapeKind, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            shape,
            reason: reason.into(),
        }
    }
}
