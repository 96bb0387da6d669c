//! Filter arguments for list-key generation

use clap::Args;
use serde_json::{Map, Value};

/// Filters describing a list query.
///
/// Supports repeated flags: `--filter type=telematico --filter active=true`.
/// Values are parsed as JSON when possible (`true`, `42`, `[1,2]`), and
/// kept as strings otherwise.
#[derive(Args, Debug, Default, Clone)]
pub struct ListFilterArgs {
    /// Filter as key=value (repeatable)
    #[arg(long = "filter", short = 'f', value_parser = parse_filter)]
    pub filters: Vec<(String, Value)>,
}

impl ListFilterArgs {
    /// Filters as a JSON object, `None` when no filter was given
    pub fn to_value(&self) -> Option<Value> {
        if self.filters.is_empty() {
            return None;
        }
        let map: Map<String, Value> = self.filters.iter().cloned().collect();
        Some(Value::Object(map))
    }
}

fn parse_filter(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("filter key is empty in '{}'", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
