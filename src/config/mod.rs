//! Configuration management for with-env

pub mod schema;

pub use schema::Config;

use crate::error::{WithEnvError, WithEnvResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Subpath of the base cache directory that holds cached virtualenvs
pub const CACHE_NAMESPACE: &str = "with-env/python-virtualenvs";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("with-env")
            .join("config.toml")
    }

    /// Resolve the base cache directory.
    ///
    /// Order: configured `cache.dir`, `$XDG_CACHE_HOME`, the platform cache
    /// directory, then `~/.cache`.
    pub fn base_cache_dir(config: &Config) -> PathBuf {
        if let Some(ref dir) = config.cache.dir {
            return dir.clone();
        }

        if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg);
            }
        }

        dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
            .unwrap_or_else(|| PathBuf::from(".cache"))
    }

    /// Directory holding the cached environments
    pub fn cache_root(config: &Config) -> PathBuf {
        Self::base_cache_dir(config).join(CACHE_NAMESPACE)
    }

    /// Directory under which temporary environments are created
    pub fn temp_root(config: &Config) -> PathBuf {
        config
            .cache
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Load configuration, falling back to defaults if the file does not exist
    pub async fn load(&self) -> WithEnvResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> WithEnvResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| WithEnvError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| WithEnvError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
