//! Endpoint classification
//!
//! Decides which of the three known Octopus response shapes (if any) an
//! exchange carries. Classification always needs BOTH the page the browser is
//! on and the API URL that produced the response: a URL match alone could hit
//! an unrelated caller of the same endpoint, and rewriting its data would be a
//! silent corruption. Missing a response only costs rendering speed.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// The response shapes the transformer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// `GET /api/progression/Projects-N` on a project overview page
    ProjectOverview,
    /// `GET /api/environments/all` on the environments page
    EnvironmentsList,
    /// `GET /api/environments/summary` on the environments page
    EnvironmentsSummary,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectOverview => "project-overview",
            Self::EnvironmentsList => "environments-list",
            Self::EnvironmentsSummary => "environments-summary",
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Octopus 2019+ prefixes both routes and API paths with a space id.
const SPACE: &str = r"(?:Spaces-[^/]+/)?";

fn build(pattern: String) -> Regex {
    // Patterns are compile-time constants; a failure here is a programming error.
    Regex::new(&pattern).unwrap_or_else(|e| panic!("bad built-in route pattern: {e}"))
}

static PROJECT_OVERVIEW_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    build(format!(
        r"(?i)^https?://.*/app#/{SPACE}projects/[^/]+/overview(?:[/?]|$)"
    ))
});

static ENVIRONMENTS_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    build(format!(
        r"(?i)^https?://.*/app#/{SPACE}infrastructure/environments(?:[/?]|$)"
    ))
});

static PROJECT_PROGRESSION_API: LazyLock<Regex> = LazyLock::new(|| {
    build(format!(r"(?i)^https?://.*/api/{SPACE}progression/Projects-"))
});

static ENVIRONMENTS_ALL_API: LazyLock<Regex> = LazyLock::new(|| {
    build(format!(
        r"(?i)^https?://.*/api/{SPACE}environments/all(?:[/?]|$)"
    ))
});

static ENVIRONMENTS_SUMMARY_API: LazyLock<Regex> = LazyLock::new(|| {
    build(format!(
        r"(?i)^https?://.*/api/{SPACE}environments/summary(?:[/?]|$)"
    ))
});

/// Classify an exchange by the browser's page location and the response URL
pub fn classify(page_location: &str, response_url: &str) -> Option<ShapeKind> {
    if PROJECT_OVERVIEW_PAGE.is_match(page_location)
        && PROJECT_PROGRESSION_API.is_match(response_url)
    {
        return Some(ShapeKind::ProjectOverview);
    }

    if ENVIRONMENTS_PAGE.is_match(page_location) {
        if ENVIRONMENTS_ALL_API.is_match(response_url) {
            return Some(ShapeKind::EnvironmentsList);
        }
        if ENVIRONMENTS_SUMMARY_API.is_match(response_url) {
            return Some(ShapeKind::EnvironmentsSummary);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERVIEW: &str = "https://octo.example.com/app#/projects/web-shop/overview";
    const ENVIRONMENTS: &str = "https://octo.example.com/app#/infrastructure/environments";

    #[test]
    fn test_project_overview() {
        assert_eq!(
            classify(
                OVERVIEW,
                "https://octo.example.com/api/progression/Projects-42"
            ),
            Some(ShapeKind::ProjectOverview)
        );
    }

    #[test]
    fn test_environments_list_and_summary() {
        assert_eq!(
            classify(ENVIRONMENTS, "https://octo.example.com/api/environments/all"),
            Some(ShapeKind::EnvironmentsList)
        );
        assert_eq!(
            classify(
                ENVIRONMENTS,
                "https://octo.example.com/api/environments/summary?ids=&take=100"
            ),
            Some(ShapeKind::EnvironmentsSummary)
        );
    }

    #[test]
    fn test_trailing_slash_and_case_tolerance() {
        assert_eq!(
            classify(
                "HTTPS://octo.example.com/APP#/Projects/web-shop/Overview/",
                "https://octo.example.com/API/Progression/projects-42/"
            ),
            Some(ShapeKind::ProjectOverview)
        );
        assert_eq!(
            classify(
                "https://octo.example.com/app#/infrastructure/environments/",
                "https://octo.example.com/api/Environments/All/"
            ),
            Some(ShapeKind::EnvironmentsList)
        );
    }

    #[test]
    fn test_space_scoped_urls() {
        assert_eq!(
            classify(
                "https://octo.example.com/app#/Spaces-1/infrastructure/environments",
                "https://octo.example.com/api/Spaces-1/environments/summary"
            ),
            Some(ShapeKind::EnvironmentsSummary)
        );
    }

    #[test]
    fn test_url_match_alone_is_not_enough() {
        let dashboard = "https://octo.example.com/app#/dashboard";
        assert_eq!(
            classify(dashboard, "https://octo.example.com/api/environments/all"),
            None
        );
        assert_eq!(
            classify(
                dashboard,
                "https://octo.example.com/api/progression/Projects-42"
            ),
            None
        );
    }

    #[test]
    fn test_page_match_alone_is_not_enough() {
        assert_eq!(
            classify(OVERVIEW, "https://octo.example.com/api/environments/all"),
            None
        );
        assert_eq!(
            classify(
                ENVIRONMENTS,
                "https://octo.example.com/api/progression/Projects-42"
            ),
            None
        );
    }

    #[test]
    fn test_similar_paths_are_rejected() {
        assert_eq!(
            classify(
                ENVIRONMENTS,
                "https://octo.example.com/api/environments/allowed"
            ),
            None
        );
        assert_eq!(
            classify(
                "https://octo.example.com/app#/projects/web-shop/overviewer",
                "https://octo.example.com/api/progression/Projects-42"
            ),
            None
        );
    }
}
