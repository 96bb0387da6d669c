//! Command execution context
//!
//! Loads configuration once and builds the cache every command runs against.

use cep_cache::{Config, EntityCache, Result};

use crate::cli::OutputFormat;

/// Context for command execution
pub struct CommandContext {
    /// Cache built from the loaded configuration; connects on first use
    pub cache: EntityCache,
    /// Output format preference
    pub format: OutputFormat,
}

impl CommandContext {
    /// Load config (file, then env, then `redis_url` override) and build the cache
    pub fn new(
        format: OutputFormat,
        config_path: Option<&str>,
        redis_url: Option<&str>,
    ) -> Result<Self> {
        let mut config = Config::load_at(config_path)?;
        if let Some(url) = redis_url {
            config.redis_url = url.to_string();
        }

        let cache = EntityCache::from_config(&config)?;
        Ok(Self { cache, format })
    }
}
