//! Source configuration: which origin to poll and how often

use crate::domain::error::SyncError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Poll intervals the dashboard offers (milliseconds)
pub const ALLOWED_INTERVALS_MS: [u64; 5] = [5_000, 10_000, 30_000, 60_000, 300_000];

pub const DEFAULT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    FileUpload,
    DelimitedExport,
    TokenedJsonEndpoint,
    MockData,
    Unsupported,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::FileUpload => "file_upload",
            SourceType::DelimitedExport => "delimited_export",
            SourceType::TokenedJsonEndpoint => "tokened_json_endpoint",
            SourceType::MockData => "mock_data",
            SourceType::Unsupported => "unsupported",
        }
    }

    /// Sources addressed by a URL or spreadsheet id
    pub fn requires_endpoint(&self) -> bool {
        matches!(self, SourceType::DelimitedExport | SourceType::TokenedJsonEndpoint)
    }
}

/// Immutable source settings for one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_type: SourceType,
    #[serde(default)]
    pub endpoint_or_id: String,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_sheet_name() -> String {
    DEFAULT_SHEET_NAME.to_string()
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl SourceConfig {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            endpoint_or_id: String::new(),
            sheet_name: default_sheet_name(),
            api_key: None,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }

    pub fn with_endpoint(mut self, endpoint_or_id: impl Into<String>) -> Self {
        self.endpoint_or_id = endpoint_or_id.into();
        self
    }

    pub fn with_sheet_name(mut self, sheet_name: impl Into<String>) -> Self {
        self.sheet_name = sheet_name.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Bearer token, ignoring blank values
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Check required fields before a connection leaves Idle
    pub fn validate(&self) -> Result<Duration, SyncError> {
        if self.source_type.requires_endpoint() && self.endpoint_or_id.trim().is_empty() {
            return Err(SyncError::Configuration(format!(
                "{} requires an endpoint URL or spreadsheet id",
                self.source_type.as_str()
            )));
        }
        validate_interval(self.interval_ms)
    }
}

/// Accept only the intervals the dashboard offers
pub fn validate_interval(interval_ms: u64) -> Result<Duration, SyncError> {
    if ALLOWED_INTERVALS_MS.contains(&interval_ms) {
        Ok(Duration::from_millis(interval_ms))
    } else {
        Err(SyncError::Configuration(format!(
            "interval {}ms not supported; choose one of {:?}",
            interval_ms, ALLOWED_INTERVALS_MS
        )))
    }
}
