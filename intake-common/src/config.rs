//! Configuration file resolution and TOML helpers
//!
//! Config file lookup follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`~/.config/intake/<module>.toml` on Linux)
//! 4. No file (built-in defaults apply)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "intake";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Locates the TOML config file for one module
#[derive(Debug, Clone)]
pub struct ConfigFileResolver {
    module_name: String,
    env_var_name: String,
}

impl ConfigFileResolver {
    /// `module_name` picks the file name (`<module_name>.toml`);
    /// `env_var_name` names the override variable (e.g. `INTAKE_CONFIG`)
    pub fn new(module_name: impl Into<String>, env_var_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            env_var_name: env_var_name.into(),
        }
    }

    /// Resolve the config file path, or `None` when only defaults apply
    ///
    /// Explicit paths (CLI or environment) are returned even when missing so
    /// that the caller can report them; the per-user default is only
    /// returned if it exists.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_arg {
            debug!("Config file from command line: {}", path.display());
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(&self.env_var_name) {
            if !path.trim().is_empty() {
                debug!("Config file from {}: {}", self.env_var_name, path);
                return Some(PathBuf::from(path));
            }
        }

        let default_path = self.default_path()?;
        if default_path.exists() {
            Some(default_path)
        } else {
            debug!("No config file at {}", default_path.display());
            None
        }
    }

    /// Platform default location for this module's config file
    pub fn default_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| {
            d.join(CONFIG_DIR_NAME)
                .join(format!("{}.toml", self.module_name))
        })
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Read TOML failed ({}): {}", path.display(), e))
    })?;
    let config = toml::from_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load a TOML config file, falling back to `T::default()` when the file is
/// missing or unreadable
///
/// A missing config must never prevent startup; parse errors are logged.
pub fn load_toml_config_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> T {
    match path {
        Some(path) if path.exists() => match load_toml_config(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                T::default()
            }
        },
        Some(path) => {
            warn!("Config file {} not found, using defaults", path.display());
            T::default()
        }
        None => T::default(),
    }
}
