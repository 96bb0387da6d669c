//! Table rows for cache commands

use serde::Serialize;
use tabled::Tabled;

use cep_cache::cache::relations;
use cep_cache::{EntityType, HealthReport, PolicyTable};

/// One entity type's effective policy
#[derive(Debug, Serialize, Tabled)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRow {
    #[tabled(rename = "ENTITY")]
    pub entity: EntityType,
    #[tabled(rename = "TTL (s)")]
    pub ttl_seconds: u64,
    #[tabled(rename = "SWR (s)")]
    pub stale_while_revalidate_seconds: u64,
    #[tabled(rename = "CACHED")]
    pub cached: bool,
    #[tabled(rename = "ALSO INVALIDATES", display = "display_entities")]
    pub related: Vec<EntityType>,
}

impl PolicyRow {
    pub fn from_table(policies: &PolicyTable) -> Vec<Self> {
        EntityType::ALL
            .into_iter()
            .map(|entity| {
                let policy = policies.policy(entity);
                Self {
                    entity,
                    ttl_seconds: policy.ttl_seconds,
                    stale_while_revalidate_seconds: policy.stale_while_revalidate_seconds,
                    cached: policy.is_cacheable(),
                    related: relations::related(entity).to_vec(),
                }
            })
            .collect()
    }
}

/// Health check outcome
#[derive(Debug, Tabled)]
pub struct HealthRow {
    #[tabled(rename = "STORE")]
    pub store: String,
    #[tabled(rename = "STATUS")]
    pub status: String,
    #[tabled(rename = "LATENCY")]
    pub latency: String,
}

impl HealthRow {
    pub fn new(store: &str, report: &HealthReport) -> Self {
        Self {
            store: store.to_string(),
            status: if report.is_ok() { "ok" } else { "error" }.to_string(),
            latency: report
                .latency_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Keys removed per entity type
#[derive(Debug, Serialize, Tabled)]
pub struct InvalidationRow {
    #[tabled(rename = "ENTITY")]
    pub entity: EntityType,
    #[tabled(rename = "REMOVED")]
    pub removed: usize,
}

fn display_entities(entities: &[EntityType]) -> String {
    if entities.is_empty() {
        return "-".to_string();
    }
    entities
        .iter()
        .map(EntityType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
