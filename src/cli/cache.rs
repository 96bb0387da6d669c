//! Cache management commands

use colored::Colorize;
use serde_json::Value;

use cep_cache::EntityType;
use cep_cache::error::Result;

use crate::cli::{CommandContext, ListFilterArgs, OutputFormat};
use crate::output::rows::{HealthRow, InvalidationRow, PolicyRow};
use crate::output::{format_json, format_table};

/// Check store reachability; returns whether the store answered
pub async fn health(ctx: &CommandContext) -> Result<bool> {
    let report = ctx.cache.health_check().await;
    let target = ctx.cache.connection().describe();

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)?),
        OutputFormat::Table => {
            let row = HealthRow::new(&target, &report);
            println!("{}", format_table(&[row]));
        }
        OutputFormat::Pretty => {
            let status = if report.is_ok() {
                "ok".green().bold()
            } else {
                "error".red().bold()
            };

            println!("Cache Health");
            println!("────────────────────────────────────────");
            println!("Store:          {}", target);
            println!("Namespace:      {}", ctx.cache.keys().namespace());
            println!("Status:         {}", status);
            if let Some(latency) = report.latency_ms {
                println!("Latency:        {} ms", latency);
            }
        }
    }

    Ok(report.is_ok())
}

/// Show the effective policy table
pub fn policies(ctx: &CommandContext) -> Result<()> {
    let rows = PolicyRow::from_table(ctx.cache.policies());

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&rows)?),
        _ => println!("{}", format_table(&rows)),
    }
    Ok(())
}

/// Print the key for a single entity
pub fn key(ctx: &CommandContext, entity: EntityType, id: &str) -> Result<()> {
    print_key(ctx.format, &ctx.cache.entity_key(entity, id))
}

/// Print the key for a list query
pub fn list_key(ctx: &CommandContext, entity: EntityType, filters: &ListFilterArgs) -> Result<()> {
    let filters = filters.to_value();
    print_key(ctx.format, &ctx.cache.list_key(entity, filters.as_ref()))
}

/// Show the cached value at a full key
pub async fn get(ctx: &CommandContext, key: &str) -> Result<()> {
    let cached: Option<Value> = ctx.cache.get(key).await;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "key": key,
                "hit": cached.is_some(),
                "value": cached,
            });
            println!("{}", format_json(&json)?);
        }
        _ => match cached {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("{} {}", "Miss:".yellow(), key),
        },
    }
    Ok(())
}

/// Invalidate one entity type, or a single identifier within it
pub async fn invalidate(ctx: &CommandContext, entity: EntityType, id: Option<&str>) -> Result<()> {
    let removed = ctx.cache.invalidate(entity, id).await;
    print_invalidations(ctx.format, &[InvalidationRow { entity, removed }])
}

/// Invalidate an entity type and all types related to it
pub async fn invalidate_related(ctx: &CommandContext, entity: EntityType) -> Result<()> {
    let rows: Vec<InvalidationRow> = ctx
        .cache
        .invalidate_cascade(entity)
        .await
        .into_iter()
        .map(|(entity, removed)| InvalidationRow { entity, removed })
        .collect();
    print_invalidations(ctx.format, &rows)
}

fn print_key(format: OutputFormat, key: &str) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", format_json(&serde_json::json!({ "key": key }))?),
        _ => println!("{}", key),
    }
    Ok(())
}

fn print_invalidations(format: OutputFormat, rows: &[InvalidationRow]) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", format_json(rows)?),
        OutputFormat::Table => println!("{}", format_table(rows)),
        OutputFormat::Pretty => {
            let total: usize = rows.iter().map(|row| row.removed).sum();
            for row in rows {
                println!("{:<14} {} keys removed", row.entity.to_string(), row.removed);
            }
            if total == 0 {
                println!("Nothing to invalidate");
            }
        }
    }
    Ok(())
}
