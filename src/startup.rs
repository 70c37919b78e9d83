// Startup module - displays banner and filter status
//
// Shows where configuration and the filter expression come from, and whether
// responses will actually be filtered, before the first request arrives.

use crate::config::{Config, VERSION};
use crate::filter;
use crate::store::{FileFilterStore, FilterStore, ENVIRONMENTS_KEY};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// What the filter will do with the current settings and expression
#[derive(Debug, PartialEq, Eq)]
pub enum FilterState {
    /// Master switch off in config.toml
    Disabled,
    /// Switch on but the expression is empty
    NoExpression,
    /// Expression compiles to this many patterns
    Active(usize),
    /// At least one fragment is not a valid regex
    Invalid(String),
}

pub fn filter_state(config: &Config, expr: &str) -> FilterState {
    if !config.filter.enabled {
        return FilterState::Disabled;
    }
    match filter::compile(expr) {
        Ok(patterns) if patterns.is_empty() => FilterState::NoExpression,
        Ok(patterns) => FilterState::Active(patterns.len()),
        Err(e) => FilterState::Invalid(e.to_string()),
    }
}

/// Print the startup banner
pub fn print_startup(config: &Config, store: &FileFilterStore) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}octo-envfilter{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Environment filtering proxy for Octopus Deploy{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!("  {DIM}Filter:{RESET} {}", store.path().display());
    println!();

    let expr = store.get(ENVIRONMENTS_KEY);
    match filter_state(config, &expr) {
        FilterState::Disabled => {
            println!("    {DIM}○ filtering disabled in config{RESET}");
        }
        FilterState::NoExpression => {
            println!("    {DIM}○ no expression set, nothing is hidden{RESET}");
        }
        FilterState::Active(count) => {
            println!(
                "    {GREEN}✓{RESET} {BOLD}{}{RESET} {DIM}({} pattern(s)){RESET}",
                expr.trim(),
                count
            );
        }
        FilterState::Invalid(error) => {
            println!("    {YELLOW}!{RESET} {YELLOW}{}{RESET}", error);
            println!(
                "      {DIM}policy: {}{RESET}",
                config.filter.invalid_pattern.as_str()
            );
        }
    }
    println!();

    println!(
        "  {MAGENTA}▸{RESET} Proxy listening on {BOLD}{}{RESET} {DIM}->{RESET} {}",
        config.bind_addr, config.upstream_url
    );
    println!();
}

/// Same summary for the log file
pub fn log_startup(config: &Config, store: &FileFilterStore) {
    let expr = store.get(ENVIRONMENTS_KEY);
    tracing::info!(
        version = VERSION,
        upstream = %config.upstream_url,
        store = %store.path().display(),
        "octo-envfilter starting"
    );
    match filter_state(config, &expr) {
        FilterState::Disabled => tracing::info!("Filtering disabled in config"),
        FilterState::NoExpression => tracing::info!("No filter expression set"),
        FilterState::Active(count) => {
            tracing::info!(patterns = count, "Filtering environments by {:?}", expr.trim())
        }
        FilterState::Invalid(error) => tracing::warn!(
            policy = config.filter.invalid_pattern.as_str(),
            "Filter expression is invalid: {}",
            error
        ),
    }
}
