//! Source adapter abstraction
//!
//! One `SourceAdapter` implementation per `SourceType`, selected by tag in
//! `build_adapter`. Adapters only fetch raw rows; normalization and
//! reconciliation happen downstream.

use crate::domain::error::SyncError;
use crate::domain::source::{SourceConfig, SourceType};
use crate::domain::types::RawRow;
use crate::io::delimited::DelimitedExportAdapter;
use crate::io::json_endpoint::TokenedJsonAdapter;
use crate::io::mock::MockGenerator;
use crate::io::workbook::FileUploadAdapter;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("fleet-sync/", env!("CARGO_PKG_VERSION"));

const UNSUPPORTED_GUIDANCE: &str = "this source needs a provider sign-in flow that is not \
     available; publish the sheet as CSV and use delimitedExport, or expose a \
     tokenedJsonEndpoint";

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Fetch the current rows from the origin
    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SyncError>;
}

/// Shared resources and knobs needed to build adapters
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub client: reqwest::Client,
    pub mock_rows: u32,
    pub mock_delay: Duration,
    pub mock_seed: Option<u64>,
}

impl AdapterContext {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, mock_rows: 57, mock_delay: Duration::from_millis(800), mock_seed: None }
    }
}

/// Build the HTTP client shared by network adapters (connection pooling).
/// `timeout_ms == 0` leaves requests without a timeout.
pub fn http_client(timeout_ms: u64) -> Result<reqwest::Client, SyncError> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }
    builder.build().map_err(|e| SyncError::Configuration(format!("http client: {}", e)))
}

/// Select the adapter for a config's source type
pub fn build_adapter(
    config: &SourceConfig,
    file: Option<Bytes>,
    ctx: &AdapterContext,
) -> Result<Arc<dyn SourceAdapter>, SyncError> {
    let adapter: Arc<dyn SourceAdapter> = match config.source_type {
        SourceType::FileUpload => Arc::new(FileUploadAdapter::new(file, &config.sheet_name)),
        SourceType::DelimitedExport => {
            Arc::new(DelimitedExportAdapter::new(ctx.client.clone(), config)?)
        }
        SourceType::TokenedJsonEndpoint => {
            Arc::new(TokenedJsonAdapter::new(ctx.client.clone(), config))
        }
        SourceType::MockData => {
            Arc::new(MockGenerator::new(ctx.mock_rows, ctx.mock_delay, ctx.mock_seed))
        }
        SourceType::Unsupported => Arc::new(UnsupportedAdapter::default()),
    };
    Ok(adapter)
}

/// Sources that need an authentication flow this engine doesn't implement
#[derive(Debug, Clone)]
pub struct UnsupportedAdapter {
    guidance: String,
}

impl Default for UnsupportedAdapter {
    fn default() -> Self {
        Self { guidance: UNSUPPORTED_GUIDANCE.to_string() }
    }
}

#[async_trait]
impl SourceAdapter for UnsupportedAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Unsupported
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SyncError> {
        Err(SyncError::UnsupportedSource { guidance: self.guidance.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AdapterContext {
        let mut ctx = AdapterContext::new(http_client(0).unwrap());
        ctx.mock_delay = Duration::ZERO;
        ctx
    }

    #[test]
    fn test_build_adapter_by_tag() {
        let ctx = ctx();
        let cases = [
            (SourceConfig::new(SourceType::FileUpload), SourceType::FileUpload),
            (
                SourceConfig::new(SourceType::DelimitedExport).with_endpoint("sheet-id"),
                SourceType::DelimitedExport,
            ),
            (
                SourceConfig::new(SourceType::TokenedJsonEndpoint).with_endpoint("http://x/fleet"),
                SourceType::TokenedJsonEndpoint,
            ),
            (SourceConfig::new(SourceType::MockData), SourceType::MockData),
            (SourceConfig::new(SourceType::Unsupported), SourceType::Unsupported),
        ];
        for (config, expected) in cases {
            let adapter = build_adapter(&config, None, &ctx).unwrap();
            assert_eq!(adapter.source_type(), expected);
        }
    }

    #[tokio::test]
    async fn test_unsupported_always_fails_with_guidance() {
        let adapter = UnsupportedAdapter::default();
        let err = adapter.fetch_rows().await.unwrap_err();
        match err {
            SyncError::UnsupportedSource { guidance } => assert!(guidance.contains("delimitedExport")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_upload_without_file() {
        let adapter =
            build_adapter(&SourceConfig::new(SourceType::FileUpload), None, &ctx()).unwrap();
        assert_eq!(adapter.fetch_rows().await, Err(SyncError::NoFileSelected));
    }
}
