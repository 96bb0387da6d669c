//! Cache-aside layer for entity queries
//!
//! Provides a Redis-backed read-through cache in front of authoritative
//! loaders, with per-entity-type TTL policies and cascading invalidation.
//! Store failures degrade every operation to its no-cache equivalent.

pub mod client;
pub mod connection;
pub mod inflight;
pub mod key;
pub mod memory;
pub mod relations;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// Re-export main types
pub use client::{CachedEnvelope, EntityCache, HealthReport, HealthStatus};
pub use connection::{ConnectionManager, Connector, DEFAULT_RETRY_AFTER};
pub use key::{KeyBuilder, NAMESPACE};
pub use memory::{MemoryConnector, MemoryStore};
pub use store::{BoundedStore, CacheStore, RedisConnector, RedisStore};

/// Class of cached domain object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Cycles,
    Campuses,
    Areas,
    Courses,
    CourseRuns,
    Leads,
    Enrollments,
    Users,
    AuditLogs,
}

impl EntityType {
    /// Every entity type, in policy-table order
    pub const ALL: [EntityType; 9] = [
        EntityType::Cycles,
        EntityType::Campuses,
        EntityType::Areas,
        EntityType::Courses,
        EntityType::CourseRuns,
        EntityType::Leads,
        EntityType::Enrollments,
        EntityType::Users,
        EntityType::AuditLogs,
    ];

    /// Name used inside cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Cycles => "cycles",
            EntityType::Campuses => "campuses",
            EntityType::Areas => "areas",
            EntityType::Courses => "courses",
            EntityType::CourseRuns => "courseRuns",
            EntityType::Leads => "leads",
            EntityType::Enrollments => "enrollments",
            EntityType::Users => "users",
            EntityType::AuditLogs => "auditLogs",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|entity| entity.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownEntity(s.to_string()))
    }
}

/// Freshness policy for one entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    /// Seconds before an entry expires; 0 means never cache
    pub ttl_seconds: u64,
    /// Seconds an expired entry may still be served while refreshing
    pub stale_while_revalidate_seconds: u64,
}

impl CachePolicy {
    /// Policy for data that must never be cached
    pub const NEVER: CachePolicy = CachePolicy::new(0, 0);

    pub const fn new(ttl_seconds: u64, stale_while_revalidate_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            stale_while_revalidate_seconds,
        }
    }

    /// Zero-TTL policies bypass the store entirely
    pub fn is_cacheable(&self) -> bool {
        self.ttl_seconds > 0
    }

    pub fn validate(&self, entity: EntityType) -> Result<(), ConfigError> {
        if self.is_cacheable() && self.stale_while_revalidate_seconds < self.ttl_seconds {
            return Err(ConfigError::Invalid(format!(
                "{}: staleWhileRevalidateSeconds ({}) must be >= ttlSeconds ({})",
                entity, self.stale_while_revalidate_seconds, self.ttl_seconds
            )));
        }
        Ok(())
    }
}

/// Built-in freshness policy per entity type
pub const DEFAULT_POLICIES: [(EntityType, CachePolicy); 9] = [
    // Static data - long cache
    (EntityType::Cycles, CachePolicy::new(3600, 7200)), // 1 hr, 2 hr stale
    (EntityType::Campuses, CachePolicy::new(3600, 7200)),
    (EntityType::Areas, CachePolicy::new(3600, 7200)),
    // Semi-static data
    (EntityType::Courses, CachePolicy::new(300, 600)), // 5 min, 10 min stale
    (EntityType::CourseRuns, CachePolicy::new(60, 120)), // 1 min, 2 min stale
    // Dynamic data - short cache
    (EntityType::Leads, CachePolicy::new(10, 30)),
    (EntityType::Enrollments, CachePolicy::new(30, 60)),
    // Per-user and audit data - never cached
    (EntityType::Users, CachePolicy::NEVER),
    (EntityType::AuditLogs, CachePolicy::NEVER),
];

/// Immutable policy lookup, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policies: BTreeMap<EntityType, CachePolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: DEFAULT_POLICIES.into_iter().collect(),
        }
    }
}

impl PolicyTable {
    /// Merge overrides over the built-in table
    pub fn with_overrides(
        overrides: &BTreeMap<EntityType, CachePolicy>,
    ) -> Result<Self, ConfigError> {
        let mut table = Self::default();
        for (entity, policy) in overrides {
            policy.validate(*entity)?;
            table.policies.insert(*entity, *policy);
        }
        Ok(table)
    }

    pub fn policy(&self, entity: EntityType) -> CachePolicy {
        self.policies
            .get(&entity)
            .copied()
            .unwrap_or(CachePolicy::NEVER)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, CachePolicy)> + '_ {
        self.policies.iter().map(|(entity, policy)| (*entity, *policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entity_has_a_policy() {
        let table = PolicyTable::default();
        assert_eq!(table.iter().count(), EntityType::ALL.len());
    }

    #[test]
    fn test_static_data_has_long_ttl() {
        let table = PolicyTable::default();
        for entity in [EntityType::Cycles, EntityType::Campuses, EntityType::Areas] {
            assert_eq!(table.policy(entity).ttl_seconds, 3600);
        }
    }

    #[test]
    fn test_dynamic_data_has_short_ttl() {
        let table = PolicyTable::default();
        assert_eq!(table.policy(EntityType::Leads).ttl_seconds, 10);
        assert_eq!(table.policy(EntityType::Enrollments).ttl_seconds, 30);
    }

    #[test]
    fn test_sensitive_data_is_never_cached() {
        let table = PolicyTable::default();
        assert!(!table.policy(EntityType::Users).is_cacheable());
        assert!(!table.policy(EntityType::AuditLogs).is_cacheable());
    }

    #[test]
    fn test_swr_at_least_ttl_for_cached_entities() {
        for (entity, policy) in DEFAULT_POLICIES {
            if policy.ttl_seconds > 0 {
                assert!(
                    policy.stale_while_revalidate_seconds >= policy.ttl_seconds,
                    "{} violates swr >= ttl",
                    entity
                );
            }
        }
    }

    #[test]
    fn test_override_replaces_default() {
        let mut overrides = BTreeMap::new();
        overrides.insert(EntityType::Leads, CachePolicy::new(0, 0));

        let table = PolicyTable::with_overrides(&overrides).unwrap();
        assert!(!table.policy(EntityType::Leads).is_cacheable());
        assert_eq!(table.policy(EntityType::Courses).ttl_seconds, 300);
    }

    #[test]
    fn test_override_rejects_swr_below_ttl() {
        let mut overrides = BTreeMap::new();
        overrides.insert(EntityType::Courses, CachePolicy::new(600, 60));

        let err = PolicyTable::with_overrides(&overrides).unwrap_err();
        assert!(err.to_string().contains("courses"));
    }

    #[test]
    fn test_entity_type_round_trips_through_name() {
        for entity in EntityType::ALL {
            assert_eq!(entity.as_str().parse::<EntityType>().unwrap(), entity);
        }
    }

    #[test]
    fn test_entity_type_parse_is_case_insensitive() {
        assert_eq!(
            "courseruns".parse::<EntityType>().unwrap(),
            EntityType::CourseRuns
        );
        assert!("widgets".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_serde_uses_key_names() {
        let json = serde_json::to_string(&EntityType::AuditLogs).unwrap();
        assert_eq!(json, "\"auditLogs\"");
    }
}
