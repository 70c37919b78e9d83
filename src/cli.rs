// CLI module - command-line argument parsing and handlers
//
// Provides subcommands for configuration management:
// - config --show: Display effective configuration
// - config --reset: Regenerate config file with defaults
// - config --edit: Open config file in $EDITOR
// - config --update: Merge new defaults into existing config
//
// and for the filter expression itself:
// - filter --show: Display the stored expression and how it compiles
// - filter --set <EXPR>: Validate and store a new expression
// - filter --clear: Remove the expression (show every environment)
// - filter --edit: Open the filter store in $EDITOR

use crate::config::{Config, VERSION};
use crate::filter;
use crate::store::{FileFilterStore, FilterStore, ENVIRONMENTS_KEY};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// octo-envfilter - Environment filtering proxy for Octopus Deploy
#[derive(Parser)]
#[command(name = "octo-envfilter")]
#[command(version = VERSION)]
#[command(about = "Environment filtering proxy for Octopus Deploy", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Open config file in $EDITOR
        #[arg(long)]
        edit: bool,

        /// Update config with new defaults (preserves user values)
        #[arg(long)]
        update: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Configure environment filtering
    Filter {
        /// Show the stored expression
        #[arg(long)]
        show: bool,

        /// Store a new expression, e.g. "Production.*, Staging.*"
        #[arg(long, value_name = "EXPR")]
        set: Option<String>,

        /// Clear the expression so every environment is shown
        #[arg(long)]
        clear: bool,

        /// Open the filter store in $EDITOR
        #[arg(long)]
        edit: bool,
    },
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> bool {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config {
            show,
            reset,
            edit,
            update,
            path,
        }) => {
            if path {
                handle_config_path();
            } else if show {
                handle_config_show();
            } else if reset {
                handle_config_reset();
            } else if edit {
                handle_config_edit();
            } else if update {
                handle_config_update();
            } else {
                println!("Usage: octo-envfilter config [--show|--reset|--edit|--update|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --edit    Open config file in $EDITOR");
                println!("  --update  Update config with new defaults (preserves user values)");
                println!("  --path    Show config file path");
            }
            true
        }
        Some(Commands::Filter {
            show,
            set,
            clear,
            edit,
        }) => {
            let store = filter_store();
            if let Some(expr) = set {
                handle_filter_set(&store, &expr);
            } else if clear {
                handle_filter_set(&store, "");
            } else if edit {
                handle_filter_edit(&store);
            } else if show {
                handle_filter_show(&store);
            } else {
                println!("Usage: octo-envfilter filter [--show|--set <EXPR>|--clear|--edit]");
                println!();
                println!("Options:");
                println!("  --show         Display the stored expression");
                println!("  --set <EXPR>   Comma-separated regexes matched against environment names");
                println!("  --clear        Remove the expression (show every environment)");
                println!("  --edit         Open the filter store in $EDITOR");
            }
            true
        }
        None => false, // No subcommand, run normal proxy
    }
}

/// Effective config, or exit with the error
fn load_config() -> Config {
    match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn filter_store() -> FileFilterStore {
    FileFilterStore::new(load_config().filter.store_path)
}

// ─────────────────────────────────────────────────────────────────────────────
// config
// ─────────────────────────────────────────────────────────────────────────────

fn handle_config_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
    }
}

fn handle_config_show() {
    let config = load_config();

    println!("# Effective configuration (env > file > defaults)");
    println!();
    println!("bind_addr = {:?}", config.bind_addr.to_string());
    println!("upstream_url = {:?}", config.upstream_url);
    println!("request_timeout_secs = {}", config.request_timeout_secs);
    println!();
    println!("[filter]");
    println!("enabled = {}", config.filter.enabled);
    println!(
        "store_path = {:?}",
        config.filter.store_path.display().to_string()
    );
    println!("page_header = {:?}", config.filter.page_header);
    println!("inject_page_script = {}", config.filter.inject_page_script);
    println!(
        "invalid_pattern = {:?}",
        config.filter.invalid_pattern.as_str()
    );
    println!();
    println!("[logging]");
    println!("level = {:?}", config.logging.level);
    println!("file_enabled = {}", config.logging.file_enabled);
    println!(
        "file_dir = {:?}",
        config.logging.file_dir.display().to_string()
    );
    println!("file_rotation = {:?}", config.logging.file_rotation.as_str());
    println!("file_prefix = {:?}", config.logging.file_prefix);

    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if path.exists() && !confirm(&format!(
        "Config file exists at {}. Overwrite? [y/N] ",
        path.display()
    )) {
        println!("Aborted.");
        return;
    }

    if let Err(e) = Config::default().save() {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config reset to defaults: {}", path.display());
}

fn handle_config_edit() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if !path.exists() {
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
    }

    open_in_editor(&path);
}

fn handle_config_update() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if !path.exists() {
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
        return;
    }

    // Re-render the template around the current values
    let existing = load_config();

    let backup_path = path.with_extension("toml.bak");
    if let Err(e) = std::fs::copy(&path, &backup_path) {
        eprintln!("Warning: Could not create backup: {}", e);
    } else {
        println!("Backup created: {}", backup_path.display());
    }

    if let Err(e) = existing.save() {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config updated with latest structure: {}", path.display());
    println!("Your values have been preserved.");
}

// ─────────────────────────────────────────────────────────────────────────────
// filter
// ─────────────────────────────────────────────────────────────────────────────

fn handle_filter_show(store: &FileFilterStore) {
    let expr = store.get(ENVIRONMENTS_KEY);
    println!("# {}", store.path().display());

    if expr.trim().is_empty() {
        println!("(no expression: every environment is shown)");
        return;
    }

    println!("environments = {:?}", expr);
    println!();

    let (patterns, errors) = filter::compile_lenient(&expr);
    for source in patterns.sources() {
        println!("  ✓ {}", source);
    }
    for error in &errors {
        println!("  ✗ {}", error);
    }
}

fn handle_filter_set(store: &FileFilterStore, expr: &str) {
    if let Err(e) = filter::compile(expr) {
        eprintln!("Error: {}", e);
        eprintln!("Nothing was changed.");
        std::process::exit(1);
    }

    if let Err(e) = store.set(ENVIRONMENTS_KEY, expr) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    if expr.trim().is_empty() {
        println!("Filter cleared: every environment is shown.");
    } else {
        println!("Filter set to {:?}", expr);
    }
    println!("A running proxy picks this up on the next request.");
}

fn handle_filter_edit(store: &FileFilterStore) {
    if let Err(e) = store.ensure_exists() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    open_in_editor(store.path());

    // Report problems now rather than on the next page load
    let expr = store.get(ENVIRONMENTS_KEY);
    if let Err(e) = filter::compile(&expr) {
        eprintln!("Warning: {}", e);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// helpers
// ─────────────────────────────────────────────────────────────────────────────

fn confirm(prompt: &str) -> bool {
    eprint!("{}", prompt);
    let _ = std::io::stderr().flush();

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().eq_ignore_ascii_case("y")
}

fn open_in_editor(path: &Path) {
    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| {
            // Platform-specific fallback
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "nano".to_string()
            }
        });

    println!("Opening {} with {}", path.display(), editor);

    match Command::new(&editor).arg(path).status() {
        Ok(s) if s.success() => {}
        Ok(s) => {
            eprintln!("Editor exited with status: {}", s);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to launch editor '{}': {}", editor, e);
            eprintln!("Set $EDITOR environment variable to your preferred editor");
            std::process::exit(1);
        }
    }
}
