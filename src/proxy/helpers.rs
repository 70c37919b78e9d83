//! Utility functions for request/response processing

use axum::http::{HeaderMap, Uri};

/// Headers that belong to a single connection and are never forwarded
pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "transfer-encoding"
            | "te"
            | "trailer"
            | "upgrade"
    )
}

/// Request headers the proxy sets itself instead of copying from the browser
pub(crate) fn is_request_managed(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    is_hop_by_hop(&lower) || lower == "host" || lower == "content-length"
}

/// Page the browser was on when it issued the request
///
/// The dedicated header wins because it can carry the `#/…` route fragment,
/// which browsers strip from `Referer`.
pub(crate) fn page_location(headers: &HeaderMap, page_header: &str) -> Option<String> {
    [page_header, "referer"]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(String::from)
}

/// Upstream URL for a request path (query string included)
pub(crate) fn forward_url(upstream_url: &str, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{}", upstream_url, path_and_query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_page_location_prefers_configured_header() {
        let mut headers = HeaderMap::new();
        headers.insert("referer", HeaderValue::from_static("https://octo/app"));
        assert_eq!(
            page_location(&headers, "x-octopus-page").as_deref(),
            Some("https://octo/app")
        );

        headers.insert(
            "x-octopus-page",
            HeaderValue::from_static("https://octo/app#/infrastructure/environments"),
        );
        assert_eq!(
            page_location(&headers, "x-octopus-page").as_deref(),
            Some("https://octo/app#/infrastructure/environments")
        );
    }

    #[test]
    fn test_page_location_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(page_location(&headers, "x-octopus-page"), None);
        headers.insert("x-octopus-page", HeaderValue::from_static(" "));
        assert_eq!(page_location(&headers, "x-octopus-page"), None);
    }

    #[test]
    fn test_forward_url_keeps_query() {
        let uri: Uri = "/api/environments/summary?ids=Environments-1&take=10"
            .parse()
            .unwrap();
        assert_eq!(
            forward_url("https://octopus.internal", &uri),
            "https://octopus.internal/api/environments/summary?ids=Environments-1&take=10"
        );
    }

    #[test]
    fn test_managed_headers() {
        assert!(is_request_managed("Host"));
        assert!(!is_request_managed("Accept-Encoding"));
        assert!(is_request_managed("Transfer-Encoding"));
        assert!(!is_request_managed("cookie"));
        assert!(!is_request_managed("x-octopus-csrf-token"));
        assert!(is_hop_by_hop("Connection"));
        assert!(!is_hop_by_hop("content-type"));
    }
}
