//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/lazytree/lazytree.toml`
//! 3. Local config: `<dir>/.lazytree.toml` (the browsed directory)
//! 4. Environment variables: `LAZYTREE_*` prefix

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::{ApplicationError, PopulationOptions, DEFAULT_BATCH_SIZE};
use crate::domain::generator::DEFAULT_INITIAL_EXPANSION_DEPTH;

/// Unified configuration for lazytree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Worker threads draining generators (0 = one per CPU)
    pub workers: usize,
    /// Items per commit sent from a worker to the writer
    pub batch_size: usize,
    /// Levels expanded when a directory is opened
    pub initial_depth: usize,
    /// Fold single-child folder chains in path trees
    pub collapse_folders: bool,
    /// Include dot-files when browsing
    pub show_hidden: bool,
    /// Entry names never shown when browsing
    pub ignore: Vec<String>,
    /// Upper bound for waiting on a population to settle
    pub wait_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            initial_depth: DEFAULT_INITIAL_EXPANSION_DEPTH,
            collapse_folders: true,
            show_hidden: false,
            ignore: vec![".git".into(), "target".into(), "node_modules".into()],
            wait_timeout_secs: 30,
        }
    }
}

/// Names a directory listing leaves out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub show_hidden: bool,
    pub ignore: Vec<String>,
}

impl EntryFilter {
    pub fn is_ignored(&self, name: &str) -> bool {
        (!self.show_hidden && name.starts_with('.')) || self.ignore.iter().any(|i| i == name)
    }
}

/// Raw settings for intermediate parsing (everything optional to detect
/// "not specified").
///
/// - `None` → field not specified, inherit from base
/// - `Some([])` → explicit empty array
/// - `Some([...])` → explicit values to merge
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub initial_depth: Option<usize>,
    pub collapse_folders: Option<bool>,
    pub show_hidden: Option<bool>,
    pub ignore: Option<Vec<String>>,
    pub wait_timeout_secs: Option<u64>,
}

/// Get the XDG config directory for lazytree.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "lazytree").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("lazytree.toml"))
}

/// Get the path to the local config file of a directory.
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(".lazytree.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Merge arrays with union semantics and negation support.
    ///
    /// - Items from overlay are added to base
    /// - Items prefixed with `!` remove the corresponding item from the result
    /// - Duplicates are de-duplicated
    ///
    /// # Examples
    /// ```ignore
    /// merge_array(&["a", "b"], &["c"])       // → ["a", "b", "c"]
    /// merge_array(&["a", "b"], &["!a", "c"]) // → ["b", "c"]
    /// ```
    pub fn merge_array(base: &[String], overlay: &[String]) -> Vec<String> {
        let mut result: HashSet<String> = base.iter().cloned().collect();

        for pattern in overlay {
            if let Some(negated) = pattern.strip_prefix('!') {
                result.remove(negated);
            } else {
                result.insert(pattern.clone());
            }
        }

        // sorted for deterministic output
        let mut vec: Vec<String> = result.into_iter().collect();
        vec.sort();
        vec
    }

    /// Merge overlay config onto self (base) with union semantics for arrays.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            ignore: overlay
                .ignore
                .as_ref()
                .map(|o| Self::merge_array(&self.ignore, o))
                .unwrap_or_else(|| self.ignore.clone()),
            ..self.apply_scalars(overlay)
        }
    }

    /// Apply global config onto defaults with REPLACE semantics for arrays.
    fn apply_global(&self, global: &RawSettings) -> Self {
        Self {
            ignore: global.ignore.clone().unwrap_or_else(|| self.ignore.clone()),
            ..self.apply_scalars(global)
        }
    }

    fn apply_scalars(&self, overlay: &RawSettings) -> Self {
        Self {
            workers: overlay.workers.unwrap_or(self.workers),
            batch_size: overlay.batch_size.unwrap_or(self.batch_size),
            initial_depth: overlay.initial_depth.unwrap_or(self.initial_depth),
            collapse_folders: overlay.collapse_folders.unwrap_or(self.collapse_folders),
            show_hidden: overlay.show_hidden.unwrap_or(self.show_hidden),
            ignore: self.ignore.clone(),
            wait_timeout_secs: overlay.wait_timeout_secs.unwrap_or(self.wait_timeout_secs),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Array Merge Semantics
    /// - Defaults → Global: REPLACE
    /// - Global → Local: UNION with `!name` negation
    /// - Any → Env vars: REPLACE
    pub fn load(local_dir: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                let raw = load_raw_settings(&global_path)?;
                current = current.apply_global(&raw);
            }
        }

        if let Some(dir) = local_dir {
            let local_path = local_config_path(dir);
            if local_path.exists() {
                let raw = load_raw_settings(&local_path)?;
                current = current.merge_with(&raw);
            }
        }

        current = Self::apply_env_overrides(current)?;
        current.validate()?;
        Ok(current)
    }

    /// Apply LAZYTREE_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("LAZYTREE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ignore")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get::<usize>("workers") {
            settings.workers = val;
        }
        if let Ok(val) = config.get::<usize>("batch_size") {
            settings.batch_size = val;
        }
        if let Ok(val) = config.get::<usize>("initial_depth") {
            settings.initial_depth = val;
        }
        if let Ok(val) = config.get_bool("collapse_folders") {
            settings.collapse_folders = val;
        }
        if let Ok(val) = config.get_bool("show_hidden") {
            settings.show_hidden = val;
        }
        if let Ok(val) = config.get::<Vec<String>>("ignore") {
            settings.ignore = val;
        }
        if let Ok(val) = config.get::<u64>("wait_timeout_secs") {
            settings.wait_timeout_secs = val;
        }

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        if self.batch_size == 0 {
            return Err(ApplicationError::Config {
                message: "batch_size must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn population_options(&self) -> PopulationOptions {
        PopulationOptions {
            workers: self.workers,
            batch_size: self.batch_size,
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn entry_filter(&self) -> EntryFilter {
        EntryFilter {
            show_hidden: self.show_hidden,
            ignore: self.ignore.clone(),
        }
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# lazytree configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/lazytree/lazytree.toml
#   Local:  <dir>/.lazytree.toml
#   Env:    LAZYTREE_* environment variables
#
# Local config UNIONS arrays with global; "!name" removes an inherited item:
#   ignore = ["dist", "!target"]

# workers = 0            # 0 = one per CPU
# batch_size = 32
# initial_depth = 1
# collapse_folders = true
# show_hidden = false
# ignore = [".git", "target", "node_modules"]
# wait_timeout_secs = 30
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
