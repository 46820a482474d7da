//! JSON endpoint with optional bearer token

use crate::domain::error::SyncError;
use crate::domain::source::{SourceConfig, SourceType};
use crate::domain::types::RawRow;
use crate::io::adapter::SourceAdapter;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::debug;

pub struct TokenedJsonAdapter {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl TokenedJsonAdapter {
    pub fn new(client: reqwest::Client, config: &SourceConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint_or_id.trim().to_string(),
            token: config.bearer_token().map(str::to_string),
        }
    }
}

#[async_trait]
impl SourceAdapter for TokenedJsonAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::TokenedJsonEndpoint
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SyncError> {
        let mut request = self.client.get(&self.endpoint).header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::SourceUnavailable(format!(
                "HTTP {} from {}",
                status, self.endpoint
            )));
        }

        let body = response.bytes().await?;
        debug!(endpoint = %self.endpoint, bytes = body.len(), "json_endpoint_fetched");
        parse_json_rows(&body)
    }
}

/// Decode a JSON array of row objects; non-object elements are skipped
pub fn parse_json_rows(body: &[u8]) -> Result<Vec<RawRow>, SyncError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| SyncError::Parse(format!("invalid JSON body: {}", e)))?;

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect()),
        other => Err(SyncError::Parse(format!(
            "expected a JSON array of rows, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array_skips_non_objects() {
        let rows = parse_json_rows(br#"[{"id": 1}, 5, null, {"id": 2, "status": "VOR"}]"#).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["status"], Value::String("VOR".into()));
    }

    #[test]
    fn test_parse_rejects_object_body() {
        let err = parse_json_rows(br#"{"vehicles": []}"#).unwrap_err();
        assert!(matches!(err, SyncError::Parse(ref msg) if msg.contains("an object")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_json_rows(b"<html>"), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_empty_array_is_fine() {
        assert_eq!(parse_json_rows(b"[]").unwrap(), Vec::<RawRow>::new());
    }
}
