//! Error taxonomy for the sync engine
//!
//! Adapters and the connection flow return `SyncError`; the engine is the
//! only place that turns one into the user-visible `Error(message)` state.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Missing or invalid configuration, detected before connecting
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or HTTP failure
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Payload could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    #[error("sheet \"{requested}\" not found; available sheets: {}", .available.join(", "))]
    SheetNotFound { requested: String, available: Vec<String> },

    #[error("no file selected; attach a workbook before connecting")]
    NoFileSelected,

    #[error("unsupported source: {guidance}")]
    UnsupportedSource { guidance: String },
}

impl SyncError {
    /// Stable snake_case kind for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Configuration(_) => "configuration",
            SyncError::SourceUnavailable(_) => "source_unavailable",
            SyncError::Parse(_) => "parse",
            SyncError::SheetNotFound { .. } => "sheet_not_found",
            SyncError::NoFileSelected => "no_file_selected",
            SyncError::UnsupportedSource { .. } => "unsupported_source",
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::SourceUnavailable(e.to_string())
    }
}
