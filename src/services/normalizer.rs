//! Row normalization
//!
//! Maps provider-shaped rows onto `VehicleRecord`s through configurable
//! column aliases. Rows without a usable positive id are dropped and
//! counted; every other field degrades to a default instead of failing.

use crate::domain::types::{RawRow, VehicleId, VehicleRecord, VehicleStatus, NOT_AVAILABLE};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Column names accepted for each canonical field, tried in order
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldAliases {
    #[serde(default = "default_id_aliases")]
    pub id: Vec<String>,
    #[serde(default = "default_status_aliases")]
    pub status: Vec<String>,
    #[serde(default = "default_location_aliases")]
    pub location: Vec<String>,
    #[serde(default = "default_driver_aliases")]
    pub driver: Vec<String>,
    #[serde(default = "default_last_updated_aliases")]
    pub last_updated: Vec<String>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn default_id_aliases() -> Vec<String> {
    owned(&["HGV_Number", "hgvNumber", "HGV Number", "hgv_number", "id", "ID", "Id"])
}

fn default_status_aliases() -> Vec<String> {
    owned(&["Status", "status", "STATUS"])
}

fn default_location_aliases() -> Vec<String> {
    owned(&["Location", "location", "LOCATION"])
}

fn default_driver_aliases() -> Vec<String> {
    owned(&["Driver", "driver", "DRIVER"])
}

fn default_last_updated_aliases() -> Vec<String> {
    owned(&["Last_Updated", "lastUpdated", "Last Updated", "updated_at"])
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self {
            id: default_id_aliases(),
            status: default_status_aliases(),
            location: default_location_aliases(),
            driver: default_driver_aliases(),
            last_updated: default_last_updated_aliases(),
        }
    }
}

/// Output of one normalization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub records: Vec<VehicleRecord>,
    /// Rows skipped for a missing, non-numeric or non-positive id
    pub dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: FieldAliases,
}

impl Normalizer {
    pub fn new(aliases: FieldAliases) -> Self {
        Self { aliases }
    }

    /// Normalize a batch; `now` stamps rows without a parseable timestamp
    pub fn normalize(&self, rows: &[RawRow], now: DateTime<Utc>) -> Normalized {
        let mut out = Normalized { records: Vec::with_capacity(rows.len()), dropped: 0 };

        for row in rows {
            match self.normalize_row(row, now) {
                Some(record) => out.records.push(record),
                None => out.dropped += 1,
            }
        }

        if out.dropped > 0 {
            debug!(rows = %rows.len(), dropped = %out.dropped, "rows_dropped_without_id");
        }
        out
    }

    /// Map one row, or None if it has no usable id
    pub fn normalize_row(&self, row: &RawRow, now: DateTime<Utc>) -> Option<VehicleRecord> {
        let id = lookup(row, &self.aliases.id).and_then(parse_id)?;

        let status = lookup(row, &self.aliases.status)
            .and_then(value_text)
            .map(|s| VehicleStatus::coerce(&s))
            .unwrap_or(VehicleStatus::Yard);
        let location = text_or_na(lookup(row, &self.aliases.location));
        let driver = text_or_na(lookup(row, &self.aliases.driver));
        let last_updated = lookup(row, &self.aliases.last_updated)
            .and_then(value_text)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);

        Some(VehicleRecord { id, status, location, driver, last_updated })
    }
}

/// First alias present with a non-empty value
fn lookup<'a>(row: &'a RawRow, aliases: &[String]) -> Option<&'a Value> {
    aliases.iter().filter_map(|name| row.get(name)).find(|value| !is_blank(value))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_or_na(value: Option<&Value>) -> String {
    value
        .and_then(value_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Integers, integral floats ("12", 12, 12.0) and trimmed numeric strings
fn parse_id(value: &Value) -> Option<VehicleId> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                VehicleId::new(i)
            } else {
                n.as_f64().and_then(integral).and_then(VehicleId::new)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.parse::<i64>() {
                Ok(i) => VehicleId::new(i),
                Err(_) => trimmed.parse::<f64>().ok().and_then(integral).and_then(VehicleId::new),
            }
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}
