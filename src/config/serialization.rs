//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

/// Quote a string as a TOML basic string (escapes backslashes in Windows paths)
fn quoted(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

impl Config {
    /// Serialize config to TOML string (single source of truth for format)
    pub fn to_toml(&self) -> String {
        format!(
            r#"# octo-envfilter configuration
#
# Environment variables override these values:
#   OCTO_ENVFILTER_BIND   bind_addr
#   OCTOPUS_URL           upstream_url
#   OCTO_ENVFILTER_STORE  filter.store_path

# Address the proxy listens on. Point your browser here instead of Octopus.
bind_addr = {bind}

# Octopus Deploy server the proxy forwards to
upstream_url = {upstream}

# Upstream request timeout in seconds
request_timeout_secs = {timeout}

# ─────────────────────────────────────────────────────────────────────────────
# ENVIRONMENT FILTERING
# ─────────────────────────────────────────────────────────────────────────────
# The filter expression itself lives in the store file (edit it with
# `octo-envfilter filter --edit` or `--set "Production.*, Staging.*"`).
# It is re-read on every response, so changes apply without a restart.

[filter]
enabled = {filter_enabled}
store_path = {store_path}

# Request header carrying the browser's page URL (Referer is used when absent)
page_header = {page_header}

# Inject the script that sends page_header from the Octopus app
inject_page_script = {inject_page_script}

# Invalid regex fragment in the expression:
#   "pass-through"  - leave responses unfiltered until the expression is fixed
#   "skip-fragment" - ignore the bad fragment, filter with the others
invalid_pattern = {invalid_pattern}

# ─────────────────────────────────────────────────────────────────────────────
# LOGGING
# ─────────────────────────────────────────────────────────────────────────────
# RUST_LOG takes precedence over `level` when set.

[logging]
level = {log_level}
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = {log_file_rotation}   # hourly, daily, never
file_prefix = {log_file_prefix}
"#,
            bind = quoted(&self.bind_addr.to_string()),
            upstream = quoted(&self.upstream_url),
            timeout = self.request_timeout_secs,
            filter_enabled = self.filter.enabled,
            store_path = quoted(&self.filter.store_path.display().to_string()),
            page_header = quoted(&self.filter.page_header),
            inject_page_script = self.filter.inject_page_script,
            invalid_pattern = quoted(self.filter.invalid_pattern.as_str()),
            log_level = quoted(&self.logging.level),
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quoted(&self.logging.file_dir.display().to_string()),
            log_file_rotation = quoted(self.logging.file_rotation.as_str()),
            log_file_prefix = quoted(&self.logging.file_prefix),
        )
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = Self::config_path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config path",
            ));
        };

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, self.to_toml())
    }
}
