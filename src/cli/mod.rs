//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

use cep_cache::EntityType;

pub mod args;
pub mod cache;
pub mod context;

pub use args::{ListFilterArgs, OutputFormat};
pub use context::CommandContext;

/// Operator tool for the CEP entity cache
#[derive(Parser, Debug)]
#[command(name = "cep-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "CEP_CACHE_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "CEP_CACHE_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override the store connection string (defaults to $REDIS_URL)
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "CEP_CACHE_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check store reachability and latency (exit 1 when unreachable)
    Health,

    /// Show the effective cache policy per entity type
    Policies,

    /// Print the cache key for a single entity
    Key {
        /// Entity type (e.g. courses, courseRuns)
        entity: EntityType,

        /// Entity identifier
        id: String,
    },

    /// Print the cache key for a list query
    ListKey {
        /// Entity type (e.g. courses, courseRuns)
        entity: EntityType,

        #[command(flatten)]
        filters: ListFilterArgs,
    },

    /// Show the cached value stored at a full key
    Get {
        /// Full cache key, e.g. cep:courses:abc123
        key: String,
    },

    /// Remove cached entries for an entity type, or one entity
    Invalidate {
        /// Entity type (e.g. courses, courseRuns)
        entity: EntityType,

        /// Only entries for this identifier
        id: Option<String>,
    },

    /// Remove cached entries for an entity type and every related type
    InvalidateRelated {
        /// Entity type (e.g. courses, courseRuns)
        entity: EntityType,
    },
}
