//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `adapter` - Source adapter trait and per-source construction
//! - `delimited` - Published spreadsheet CSV/TSV export over HTTP
//! - `json_endpoint` - JSON rows from a bearer-token endpoint
//! - `workbook` - Uploaded xlsx/xls/ods workbook decoding
//! - `mock` - Seeded random fleet data for demos
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod adapter;
pub mod delimited;
pub mod json_endpoint;
pub mod mock;
pub mod prometheus;
pub mod workbook;

// Re-export commonly used types
pub use adapter::{build_adapter, http_client, AdapterContext, SourceAdapter};
