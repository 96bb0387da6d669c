//! Configuration management for the entity cache

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::{CachePolicy, EntityType, NAMESPACE};
use crate::error::{ConfigError, Result};

/// Environment variable holding the store connection string
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Environment variable overriding the key namespace
pub const NAMESPACE_ENV: &str = "CEP_CACHE_NAMESPACE";

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store connection string
    pub redis_url: String,

    /// Prefix for every cache key
    pub namespace: String,

    /// Bound on establishing a store connection
    pub connect_timeout_ms: u64,

    /// Bound on each store command
    pub response_timeout_ms: u64,

    /// Pause after a failed connect before trying again
    pub reconnect_cooldown_ms: u64,

    /// Let concurrent misses on one key share a single loader call
    pub coalesce_misses: bool,

    /// Per-entity overrides of the built-in policy table
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<EntityType, CachePolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            namespace: NAMESPACE.to_string(),
            connect_timeout_ms: 2000,
            response_timeout_ms: 1000,
            reconnect_cooldown_ms: 1000,
            coalesce_misses: false,
            policies: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or(ConfigError::Invalid(
            "Could not determine config directory".to_string(),
        ))?;

        Ok(base.join("cep-cache").join("config.yaml"))
    }

    /// Load from the default path if it exists, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Ok(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from an explicit path (if given) or the default location
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                let mut config = Self::load_from(Path::new(path))?;
                config.apply_env(|name| std::env::var(name).ok());
                Ok(config)
            }
            None => Self::load(),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;

        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(REDIS_URL_ENV).filter(|v| !v.is_empty()) {
            self.redis_url = url;
        }
        if let Some(namespace) = lookup(NAMESPACE_ENV).filter(|v| !v.is_empty()) {
            self.namespace = namespace;
        }
    }

    /// Check namespace shape and policy overrides
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if self.namespace.contains(':') || self.namespace.contains('*') {
            return Err(ConfigError::Invalid(format!(
                "namespace '{}' must not contain ':' or '*'",
                self.namespace
            )));
        }
        for (entity, policy) in &self.policies {
            policy.validate(*entity)?;
        }
        Ok(())
    }
}
