// Admin endpoints - Read and change the environment filter expression
//
// GET  /_envfilter/filter  -> current expression and how it compiles
// PUT  /_envfilter/filter  -> replace the expression ({"environments": "..."})
//
// The interceptor re-reads the store on every response, so a successful PUT
// applies to the very next filtered request. Bound to the proxy listener,
// which is 127.0.0.1 by default.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::filter;
use crate::store::ENVIRONMENTS_KEY;

use super::ProxyState;

/// Response body for both endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterStatus {
    /// Raw expression as stored
    pub environments: String,
    /// False when the master switch in config.toml is off
    pub enabled: bool,
    /// Fragments that compiled
    pub patterns: Vec<String>,
    /// One message per fragment that did not
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FilterUpdate {
    pub environments: String,
}

#[derive(Debug)]
pub enum AdminError {
    Internal(String),
    InvalidExpression(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AdminError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AdminError::InvalidExpression(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        };

        tracing::warn!("Admin error: {} - {}", status, message);

        (status, message).into_response()
    }
}

fn status_for(state: &ProxyState, expr: String) -> FilterStatus {
    let (patterns, errors) = filter::compile_lenient(&expr);
    FilterStatus {
        patterns: patterns.sources().into_iter().map(String::from).collect(),
        errors: errors.iter().map(ToString::to_string).collect(),
        environments: expr,
        enabled: state.filter_enabled,
    }
}

pub async fn get_filter(State(state): State<ProxyState>) -> Json<FilterStatus> {
    let expr = state.store.get(ENVIRONMENTS_KEY);
    Json(status_for(&state, expr))
}

pub async fn put_filter(
    State(state): State<ProxyState>,
    Json(update): Json<FilterUpdate>,
) -> Result<Json<FilterStatus>, AdminError> {
    // Reject outright rather than store something the filter would skip
    filter::compile(&update.environments)
        .map_err(|e| AdminError::InvalidExpression(e.to_string()))?;

    state
        .store
        .set(ENVIRONMENTS_KEY, &update.environments)
        .map_err(|e| AdminError::Internal(format!("{:#}", e)))?;

    tracing::info!(environments = %update.environments, "Filter expression updated");

    Ok(Json(status_for(&state, update.environments)))
}
