//! Filter expression storage
//!
//! The filter expression lives outside the main config file so it can be
//! changed while the proxy runs (CLI `filter --set`, `PUT /_envfilter/filter`,
//! or by hand in an editor). The interceptor reads it on every response, so a
//! change applies to the next completed request without a restart.
//!
//! File format (`~/.config/octo-envfilter/filter.toml`):
//!
//! ```toml
//! environments = "Production.*, Staging.*"
//! ```

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// The only key the filtering layer reads
pub const ENVIRONMENTS_KEY: &str = "environments";

/// Key/value store holding the user's filter expressions
///
/// `get` never fails: an unset or unreadable value reads as the empty string,
/// which disables filtering.
pub trait FilterStore: Send + Sync {
    /// Current value for `key`, or `""` when unset
    fn get(&self, key: &str) -> String;

    /// Persist a new value for `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Shared handle passed to the proxy and the admin endpoints
pub type SharedFilterStore = Arc<dyn FilterStore>;

// ============================================================================
// File-backed store
// ============================================================================

/// On-disk document; unknown keys are kept so `set` never drops them
type FilterDocument = BTreeMap<String, String>;

/// Store persisted as a small TOML file, re-read on every `get`
#[derive(Debug, Clone)]
pub struct FileFilterStore {
    path: PathBuf,
}

impl FileFilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: ~/.config/octo-envfilter/filter.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("octo-envfilter").join("filter.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<FilterDocument> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FilterDocument::default()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        }
    }

    /// Write to a sibling temp file, then rename over the store, so a
    /// concurrent `get` sees either the old document or the new one
    fn replace_file(&self, contents: &[u8]) -> Result<()> {
        static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "filter.toml".into());
        name.push(format!(
            ".{}.{}.tmp",
            std::process::id(),
            NEXT_TEMP.fetch_add(1, Ordering::Relaxed)
        ));
        let temp = self.path.with_file_name(name);

        if let Err(e) = std::fs::write(&temp, contents) {
            let _ = std::fs::remove_file(&temp);
            return Err(e).with_context(|| format!("Failed to write {}", temp.display()));
        }
        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e).with_context(|| format!("Failed to replace {}", self.path.display()));
        }
        Ok(())
    }

    /// Create the file with an empty expression if it doesn't exist
    pub fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.set(ENVIRONMENTS_KEY, "")
    }
}

impl FilterStore for FileFilterStore {
    fn get(&self, key: &str) -> String {
        match self.read_document() {
            Ok(mut doc) => doc.remove(key).unwrap_or_default(),
            Err(e) => {
                // Same outcome as an empty expression: filtering off for this read
                tracing::warn!("Filter store unreadable, treating as empty: {:#}", e);
                String::new()
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        // A corrupt file is replaced rather than blocking the update
        let mut doc = self.read_document().unwrap_or_default();
        doc.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let contents = toml::to_string(&doc).context("Failed to serialize filter store")?;
        let header = "# Display only environments matching these regular expressions\n\
                      # (comma separated, case-insensitive). Empty disables filtering.\n";
        self.replace_file(format!("{header}{contents}").as_bytes())?;

        tracing::debug!(key, value, path = %self.path.display(), "Filter store updated");
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store for tests and embedding without a file
#[derive(Debug, Default, Clone)]
pub struct MemoryFilterStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryFilterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an environments expression
    pub fn with_environments(expr: &str) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.write() {
            values.insert(ENVIRONMENTS_KEY.to_string(), expr.to_string());
        }
        store
    }
}

impl FilterStore for MemoryFilterStore {
    fn get(&self, key: &str) -> String {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| anyhow::anyhow!("filter store lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
