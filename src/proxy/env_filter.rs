//! Environment filter interceptor
//!
//! Rewrites the three Octopus responses that list environments so only the
//! ones matching the user's expression remain. The expression is read from the
//! store when each response completes, never cached, so edits take effect on
//! the next request.
//!
//! Anything it cannot handle (unclassified exchange, empty expression, bad
//! regex, unexpected JSON) leaves the original bytes in place.

use bytes::Bytes;

use crate::config::{FilterSettings, InvalidPatternPolicy};
use crate::filter::{self, FilterOutcome, FilterPatterns, ShapeKind};
use crate::store::{SharedFilterStore, ENVIRONMENTS_KEY};

use super::interceptor::{Exchange, InterceptResult, ResponseInterceptor, Target};

pub struct EnvironmentFilter {
    store: SharedFilterStore,
    policy: InvalidPatternPolicy,
}

impl EnvironmentFilter {
    pub fn new(store: SharedFilterStore, policy: InvalidPatternPolicy) -> Self {
        Self { store, policy }
    }

    pub fn from_settings(settings: &FilterSettings, store: SharedFilterStore) -> Self {
        Self::new(store, settings.invalid_pattern)
    }

    /// Compile the current expression according to the invalid-pattern policy.
    ///
    /// `Ok(None)` means filtering is off for this response.
    fn current_patterns(&self) -> anyhow::Result<Option<FilterPatterns>> {
        let expr = self.store.get(ENVIRONMENTS_KEY);
        if expr.trim().is_empty() {
            return Ok(None);
        }

        let patterns = match self.policy {
            InvalidPatternPolicy::PassThrough => filter::compile(&expr)?,
            InvalidPatternPolicy::SkipFragment => {
                let (patterns, errors) = filter::compile_lenient(&expr);
                for error in &errors {
                    tracing::warn!("Skipping filter fragment: {}", error);
                }
                patterns
            }
        };

        Ok((!patterns.is_empty()).then_some(patterns))
    }

    fn filter_body(
        &self,
        shape: ShapeKind,
        body: &Bytes,
        patterns: &FilterPatterns,
    ) -> anyhow::Result<Option<Bytes>> {
        let json: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| filter::FilterError::malformed(shape, format!("invalid JSON: {e}")))?;

        match filter::transform(shape, json, patterns)? {
            FilterOutcome::Unchanged => {
                tracing::debug!(shape = %shape, "Response shape not applicable, passing through");
                Ok(None)
            }
            FilterOutcome::Filtered { body, stats } => {
                tracing::info!(
                    shape = %shape,
                    kept = stats.kept,
                    dropped = stats.dropped,
                    "Filtered environments"
                );
                Ok(Some(Bytes::from(serde_json::to_vec(&body)?)))
            }
        }
    }
}

impl ResponseInterceptor for EnvironmentFilter {
    fn name(&self) -> &'static str {
        "environment-filter"
    }

    /// Exchanges that classify as a known shape
    fn claims(&self, target: &Target) -> bool {
        classify(target).is_some()
    }

    /// Error bodies pass through untouched
    fn should_apply(&self, exchange: &Exchange) -> bool {
        (200..300).contains(&exchange.status)
    }

    fn on_complete(&self, exchange: &Exchange, body: &Bytes) -> InterceptResult {
        let Some(shape) = classify(&exchange.target()) else {
            return InterceptResult::PassThrough;
        };

        let patterns = match self.current_patterns() {
            Ok(Some(patterns)) => patterns,
            Ok(None) => {
                tracing::debug!(shape = %shape, "Filtering disabled, passing through");
                return InterceptResult::PassThrough;
            }
            Err(e) => return InterceptResult::Error(e),
        };

        match self.filter_body(shape, body, &patterns) {
            Ok(Some(filtered)) => InterceptResult::Replace(filtered),
            Ok(None) => InterceptResult::PassThrough,
            Err(e) => InterceptResult::Error(e),
        }
    }
}

fn classify(target: &Target) -> Option<ShapeKind> {
    filter::classify(target.page_location?, target.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterError;
    use crate::store::{FilterStore, MemoryFilterStore};
    use serde_json::{json, Value};
    use std::sync::Arc;

    const ENV_PAGE: &str = "https://octo.example.com/app#/infrastructure/environments";
    const ENV_ALL: &str = "https://octo.example.com/api/environments/all";

    fn interceptor(expr: &str, policy: InvalidPatternPolicy) -> (EnvironmentFilter, MemoryFilterStore) {
        let store = MemoryFilterStore::with_environments(expr);
        (EnvironmentFilter::new(Arc::new(store.clone()), policy), store)
    }

    fn exchange<'a>(page: Option<&'a str>, url: &'a str) -> Exchange<'a> {
        Exchange {
            method: "GET",
            page_location: page,
            response_url: url,
            status: 200,
        }
    }

    fn environments_body() -> Bytes {
        Bytes::from(
            json!([
                {"Id": "Environments-1", "Name": "Production"},
                {"Id": "Environments-2", "Name": "Dev"}
            ])
            .to_string(),
        )
    }

    fn replaced(result: InterceptResult) -> Value {
        match result {
            InterceptResult::Replace(body) => serde_json::from_slice(&body).unwrap(),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn test_filters_classified_response() {
        let (filter, _) = interceptor("Prod", InvalidPatternPolicy::PassThrough);
        let ex = exchange(Some(ENV_PAGE), ENV_ALL);
        assert!(filter.claims(&ex.target()));
        assert!(filter.should_apply(&ex));

        let body = replaced(filter.on_complete(&ex, &environments_body()));
        assert_eq!(body, json!([{"Id": "Environments-1", "Name": "Production"}]));
    }

    #[test]
    fn test_unclassified_is_not_claimed() {
        let (filter, _) = interceptor("Prod", InvalidPatternPolicy::PassThrough);
        assert!(!filter.claims(&exchange(None, ENV_ALL).target()));
        assert!(!filter.claims(
            &exchange(Some("https://octo.example.com/app#/dashboard"), ENV_ALL).target()
        ));
        // What a browser puts in Referer: no route fragment
        assert!(!filter.claims(
            &exchange(Some("https://octo.example.com/app"), ENV_ALL).target()
        ));
    }

    #[test]
    fn test_error_status_is_skipped() {
        let (filter, _) = interceptor("Prod", InvalidPatternPolicy::PassThrough);
        let mut ex = exchange(Some(ENV_PAGE), ENV_ALL);
        ex.status = 404;
        assert!(!filter.should_apply(&ex));
    }

    #[test]
    fn test_empty_expression_passes_through() {
        let (filter, _) = interceptor("  ", InvalidPatternPolicy::PassThrough);
        let ex = exchange(Some(ENV_PAGE), ENV_ALL);
        assert!(matches!(
            filter.on_complete(&ex, &environments_body()),
            InterceptResult::PassThrough
        ));
    }

    #[test]
    fn test_expression_is_reread_per_response() {
        let (filter, store) = interceptor("", InvalidPatternPolicy::PassThrough);
        let ex = exchange(Some(ENV_PAGE), ENV_ALL);
        assert!(matches!(
            filter.on_complete(&ex, &environments_body()),
            InterceptResult::PassThrough
        ));

        store.set(ENVIRONMENTS_KEY, "Dev").unwrap();
        let body = replaced(filter.on_complete(&ex, &environments_body()));
        assert_eq!(body, json!([{"Id": "Environments-2", "Name": "Dev"}]));
    }

    #[test]
    fn test_invalid_pattern_pass_through_policy() {
        let (filter, _) = interceptor("[invalid", InvalidPatternPolicy::PassThrough);
        let ex = exchange(Some(ENV_PAGE), ENV_ALL);
        match filter.on_complete(&ex, &environments_body()) {
            InterceptResult::Error(e) => assert!(matches!(
                e.downcast_ref::<FilterError>(),
                Some(FilterError::InvalidPattern { .. })
            )),
            other => panic!("Expected Error, got {:?}", other),
        }

        // A mix of good and bad fragments also disables filtering for the pass
        let (filter, _) = interceptor("Prod, [invalid", InvalidPatternPolicy::PassThrough);
        assert!(matches!(
            filter.on_complete(&ex, &environments_body()),
            InterceptResult::Error(_)
        ));
    }

    #[test]
    fn test_invalid_pattern_skip_fragment_policy() {
        let (filter, _) = interceptor("Prod, [invalid", InvalidPatternPolicy::SkipFragment);
        let ex = exchange(Some(ENV_PAGE), ENV_ALL);
        let body = replaced(filter.on_complete(&ex, &environments_body()));
        assert_eq!(body, json!([{"Id": "Environments-1", "Name": "Production"}]));

        // Nothing valid left: filtering is off, not "hide everything"
        let (filter, _) = interceptor("[invalid", InvalidPatternPolicy::SkipFragment);
        assert!(matches!(
            filter.on_complete(&ex, &environments_body()),
            InterceptResult::PassThrough
        ));
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        let (filter, _) = interceptor("Prod", InvalidPatternPolicy::PassThrough);
        let ex = exchange(Some(ENV_PAGE), ENV_ALL);
        for body in [&b"<html>oops</html>"[..], &b"{\"Items\": []}"[..]] {
            match filter.on_complete(&ex, &Bytes::copy_from_slice(body)) {
                InterceptResult::Error(e) => assert!(matches!(
                    e.downcast_ref::<FilterError>(),
                    Some(FilterError::MalformedResponse { .. })
                )),
                other => panic!("Expected Error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_project_overview_without_environments_passes_through() {
        let (filter, _) = interceptor("Prod", InvalidPatternPolicy::PassThrough);
        let ex = exchange(
            Some("https://octo.example.com/app#/projects/web/overview"),
            "https://octo.example.com/api/progression/Projects-1",
        );
        let body = Bytes::from_static(br#"{"Releases": []}"#);
        assert!(matches!(
            filter.on_complete(&ex, &body),
            InterceptResult::PassThrough
        ));
    }
}
