//! Cache-aside layer for the CEP education platform
//!
//! Wraps authoritative entity loaders with a Redis-backed cache. Each entity
//! type has a static freshness policy; writes invalidate the entity and the
//! entity types derived from it. The store is strictly optional at runtime:
//! when it is unreachable every call falls through to the loader.
//!
//! ```ignore
//! let cache = EntityCache::from_config(&Config::load()?)?;
//!
//! let course = cache
//!     .with_cache(EntityType::Courses, &course_id, || load_course(&db, &course_id))
//!     .await?;
//!
//! update_course(&db, &course_id, patch).await?;
//! cache.invalidate_related(EntityType::Courses).await;
//! ```

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CachePolicy, EntityCache, EntityType, HealthReport, HealthStatus, PolicyTable};
pub use config::Config;
pub use error::{ConfigError, Error, Result, StoreError};
