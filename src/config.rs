//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::events::TracingEventSink;
use crate::index::{IndexDirectory, PolicyConfig};
use crate::registry::DataTypeRegistry;
use crate::storage::engine::StoreContext;
use crate::storage::spec::{LoadStyle, SpecDefaults};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    /// all, hollow or none
    #[serde(default = "default_load_style")]
    pub load_style: String,

    /// e.g. `keep`, `hollow-after-use:64`, `hollow-at-volume:1048576`
    #[serde(default = "default_cache_policy")]
    pub cache_policy: String,

    /// Wait limit for a concurrent open of the same index, 0 waits forever
    #[serde(default = "default_gate_timeout")]
    pub gate_timeout_ms: u64,

    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,

    /// JSON file of registered data types
    #[serde(default)]
    pub type_registry: Option<String>,
}

fn default_index_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("timeindex").to_string_lossy().to_string())
        .unwrap_or_else(|| "./timeindex_data".to_string())
}

fn default_load_style() -> String {
    LoadStyle::default().to_string()
}

fn default_cache_policy() -> String {
    PolicyConfig::default().to_string()
}

fn default_gate_timeout() -> u64 {
    30_000
}

fn default_sync_on_commit() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            load_style: default_load_style(),
            cache_policy: default_cache_policy(),
            gate_timeout_ms: default_gate_timeout(),
            sync_on_commit: default_sync_on_commit(),
            type_registry: None,
        }
    }
}

impl StorageConfig {
    pub fn index_dir(&self) -> PathBuf {
        PathBuf::from(&self.index_dir)
    }

    /// Defaults for index properties left unset
    pub fn spec_defaults(&self) -> Result<SpecDefaults, ConfigError> {
        let load_style = self.load_style.parse().map_err(|e| ConfigError::Invalid {
            field: "storage.load_style",
            error: e,
        })?;
        let policy = self.cache_policy.parse().map_err(|e| ConfigError::Invalid {
            field: "storage.cache_policy",
            error: e,
        })?;
        Ok(SpecDefaults { load_style, policy })
    }

    pub fn gate_timeout(&self) -> Option<Duration> {
        (self.gate_timeout_ms > 0).then(|| Duration::from_millis(self.gate_timeout_ms))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("timeindex").join("config.toml")),
            Some(PathBuf::from("/etc/timeindex/config.toml")),
            Some(PathBuf::from("./timeindex.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Store collaborators described by this config
    pub fn store_context(&self) -> Result<StoreContext, ConfigError> {
        let registry = match &self.storage.type_registry {
            Some(path) => DataTypeRegistry::load(Path::new(path)).map_err(|e| ConfigError::Io {
                path: PathBuf::from(path),
                error: e.to_string(),
            })?,
            None => DataTypeRegistry::builtin(),
        };

        Ok(StoreContext {
            registry: Arc::new(registry),
            events: Arc::new(TracingEventSink),
            sync_on_commit: self.storage.sync_on_commit,
        })
    }

    /// Index directory configured from this config
    pub fn directory(&self) -> Result<IndexDirectory, ConfigError> {
        let mut directory = IndexDirectory::new(self.store_context()?)
            .with_defaults(self.storage.spec_defaults()?);
        if let Some(timeout) = self.storage.gate_timeout() {
            directory = directory.with_gate_timeout(timeout);
        }
        Ok(directory)
    }

    fn apply_env_overrides(&mut self) {
        // Storage overrides
        if let Ok(index_dir) = std::env::var("TIMEINDEX_INDEX_DIR") {
            self.storage.index_dir = index_dir;
        }
        if let Ok(load_style) = std::env::var("TIMEINDEX_LOAD_STYLE") {
            self.storage.load_style = load_style;
        }
        if let Ok(policy) = std::env::var("TIMEINDEX_CACHE_POLICY") {
            self.storage.cache_policy = policy;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TIMEINDEX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TIMEINDEX_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {field}: {error}")]
    Invalid { field: &'static str, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# TimeIndex Configuration
#
# Environment variables override these settings:
# - TIMEINDEX_INDEX_DIR
# - TIMEINDEX_LOAD_STYLE
# - TIMEINDEX_CACHE_POLICY
# - TIMEINDEX_LOG_LEVEL
# - TIMEINDEX_LOG_FORMAT

[storage]
# Directory holding index (.tix) and data (.tdat) files
index_dir = "~/.local/share/timeindex"

# What to load when an index is opened: all, hollow or none
load_style = "hollow"

# Cache policy for opened indexes:
#   keep
#   hollow-after-use:<items>
#   hollow-after-timeout:<ms>
#   hollow-at-volume:<bytes>
#   remove-after-use:<items>   (file-backed indexes only)
cache_policy = "keep"

# How long to wait for another thread opening the same index (ms, 0 = forever)
gate_timeout_ms = 30000

# fsync index and data files on every commit
sync_on_commit = true

# Optional JSON file of registered data types
# type_registry = "~/.local/share/timeindex/types.json"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.storage.load_style, "hollow");
        assert_eq!(config.storage.cache_policy, "keep");
        assert_eq!(config.storage.gate_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.logging.format, "pretty");

        let defaults = config.storage.spec_defaults().unwrap();
        assert_eq!(defaults.load_style, LoadStyle::Hollow);
        assert_eq!(defaults.policy, PolicyConfig::Keep);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("timeindex.toml");
        std::fs::write(
            &path,
            "[storage]\ncache_policy = \"hollow-after-use:8\"\ngate_timeout_ms = 0\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.load_style, "hollow");
        assert_eq!(config.storage.gate_timeout(), None);
        assert_eq!(
            config.storage.spec_defaults().unwrap().policy,
            PolicyConfig::HollowAfterUse(8)
        );
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_policy() {
        let config = Config {
            storage: StorageConfig {
                cache_policy: "lru".to_string(),
                ..StorageConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            config.storage.spec_defaults(),
            Err(ConfigError::Invalid { field: "storage.cache_policy", .. })
        ));
        assert!(config.directory().is_err());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[storage\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_missing_registry_file_gives_builtin_types() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.type_registry = Some(dir.path().join("types.json").display().to_string());

        let context = config.store_context().unwrap();
        assert!(context.registry.resolve_by_name("text/plain").is_some());
    }
}
