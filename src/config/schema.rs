//! Configuration schema for with-env
//!
//! Configuration is stored at `~/.config/with-env/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Environment cache settings
    pub cache: CacheConfig,

    /// Python virtualenv settings
    pub python: PythonConfig,

    /// Throwaway database settings
    pub database: DatabaseConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Environment cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached environments kept on disk
    pub max_entries: usize,

    /// Base cache directory (defaults to $XDG_CACHE_HOME or the platform cache dir)
    pub dir: Option<PathBuf>,

    /// Where temporary environments are created (defaults to the system temp dir)
    pub temp_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            dir: None,
            temp_dir: None,
        }
    }
}

/// Python virtualenv provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// virtualenv executable
    pub virtualenv: String,

    /// pip executable, resolved inside the activated environment
    pub pip: String,

    /// Manifest used when --requirements is not given
    pub default_requirements: PathBuf,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            virtualenv: "virtualenv".to_string(),
            pip: "pip".to_string(),
            default_requirements: PathBuf::from("requirements.txt"),
        }
    }
}

/// PostgreSQL throwaway database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database name prefix
    pub prefix: String,

    /// createdb executable
    pub createdb: String,

    /// dropdb executable
    pub dropdb: String,

    /// Encoding passed to createdb
    pub encoding: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            prefix: "tmp".to_string(),
            createdb: "createdb".to_string(),
            dropdb: "dropdb".to_string(),
            encoding: "UTF8".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("max_entries = 10"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.database.prefix, "tmp");
        assert_eq!(
            config.python.default_requirements,
            PathBuf::from("requirements.txt")
        );
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            max_entries = 3
            dir = "/var/cache/envs"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.max_entries, 3);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/envs")));
        assert_eq!(config.python.virtualenv, "virtualenv"); // default preserved
    }
}
