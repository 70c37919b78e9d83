//! Environment filtering settings
//!
//! The filter expression itself is NOT stored here: it lives in the filter
//! store (see `crate::store`) so it can change while the proxy runs. This
//! section only says where to find it and how to apply it.

use serde::Deserialize;
use std::path::PathBuf;

use crate::store::FileFilterStore;

/// What to do when the stored expression contains an invalid regex fragment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidPatternPolicy {
    /// Skip filtering for that response entirely (default)
    #[default]
    PassThrough,
    /// Drop the offending fragment and filter with the rest
    SkipFragment,
}

impl InvalidPatternPolicy {
    /// Parse policy string from config
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "skip-fragment" => Self::SkipFragment,
            _ => Self::PassThrough,
        }
    }

    /// Convert to string for TOML serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassThrough => "pass-through",
            Self::SkipFragment => "skip-fragment",
        }
    }
}

/// Filtering settings
#[derive(Debug, Clone)]
pub struct FilterSettings {
    /// Master kill-switch. When false every response passes through untouched,
    /// whatever the stored expression says.
    pub enabled: bool,

    /// Path of the filter store file
    pub store_path: PathBuf,

    /// Request header carrying the browser's page location (falls back to Referer)
    pub page_header: String,

    /// Add the script that sets `page_header` to the app's HTML document.
    /// Turn off only if something else already sends the header.
    pub inject_page_script: bool,

    /// Handling of invalid regex fragments in the stored expression
    pub invalid_pattern: InvalidPatternPolicy,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: FileFilterStore::default_path()
                .unwrap_or_else(|| PathBuf::from("./filter.toml")),
            page_header: "x-octopus-page".to_string(),
            inject_page_script: true,
            invalid_pattern: InvalidPatternPolicy::PassThrough,
        }
    }
}

/// Filtering settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileFilter {
    pub enabled: Option<bool>,
    pub store_path: Option<String>,
    pub page_header: Option<String>,
    pub inject_page_script: Option<bool>,
    pub invalid_pattern: Option<String>,
}

impl FilterSettings {
    /// Create from file config with defaults
    pub fn from_file(file: Option<FileFilter>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            store_path: file
                .store_path
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            page_header: file
                .page_header
                .map(|h| h.to_lowercase())
                .unwrap_or(defaults.page_header),
            inject_page_script: file
                .inject_page_script
                .unwrap_or(defaults.inject_page_script),
            invalid_pattern: file
                .invalid_pattern
                .map(|s| InvalidPatternPolicy::from_str(&s))
                .unwrap_or(defaults.invalid_pattern),
        }
    }
}
