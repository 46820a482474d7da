//! Spreadsheet published as delimited text (CSV export)
//!
//! A bare spreadsheet id is turned into a Google Sheets CSV export URL.
//! Parsing sniffs the delimiter from the header line and requires equal
//! record lengths; if that fails, one recovery pass re-reads the body with
//! an explicit comma delimiter and flexible record lengths.

use crate::domain::error::SyncError;
use crate::domain::source::{SourceConfig, SourceType};
use crate::domain::types::RawRow;
use crate::io::adapter::SourceAdapter;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

pub struct DelimitedExportAdapter {
    client: reqwest::Client,
    url: String,
}

impl DelimitedExportAdapter {
    pub fn new(client: reqwest::Client, config: &SourceConfig) -> Result<Self, SyncError> {
        let url = export_url(&config.endpoint_or_id, &config.sheet_name)?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SourceAdapter for DelimitedExportAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::DelimitedExport
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SyncError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::SourceUnavailable(format!("HTTP {} from {}", status, self.url)));
        }

        let body = response.text().await?;
        debug!(url = %self.url, bytes = body.len(), "delimited_export_fetched");
        parse_delimited(&body)
    }
}

/// URLs pass through; a bare id becomes a CSV export URL for `sheet_name`
pub fn export_url(endpoint_or_id: &str, sheet_name: &str) -> Result<String, SyncError> {
    let trimmed = endpoint_or_id.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(trimmed.to_string());
    }
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(SyncError::Configuration(format!(
            "\"{}\" is neither a URL nor a spreadsheet id",
            trimmed
        )));
    }

    let base = format!("https://docs.google.com/spreadsheets/d/{}/gviz/tq", trimmed);
    let mut params = vec![("tqx", "out:csv")];
    let sheet = sheet_name.trim();
    if !sheet.is_empty() {
        params.push(("sheet", sheet));
    }
    reqwest::Url::parse_with_params(&base, &params)
        .map(String::from)
        .map_err(|e| SyncError::Configuration(format!("invalid export url: {}", e)))
}

/// Parse delimited text with a header row into raw rows
pub fn parse_delimited(text: &str) -> Result<Vec<RawRow>, SyncError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let delimiter = sniff_delimiter(text);

    let first = match read_rows(text, delimiter, false) {
        Ok((_, rows)) => return Ok(rows),
        Err(e) => e,
    };
    warn!(
        error = %first,
        delimiter = %(delimiter as char).escape_default(),
        "delimited_parse_retry_with_comma"
    );

    let (columns, rows) = read_rows(text, b',', true)
        .map_err(|retry| SyncError::Parse(format!("{}; comma retry failed: {}", first, retry)))?;
    // A non-comma header collapses into one column under the comma retry
    if delimiter != b',' && columns < 2 {
        return Err(SyncError::Parse(format!(
            "{}; comma retry found a single column",
            first
        )));
    }
    Ok(rows)
}

/// Pick the candidate delimiter that appears most often in the header line
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let mut best = (b',', 0usize);
    for candidate in CANDIDATE_DELIMITERS {
        let count = header.bytes().filter(|&b| b == candidate).count();
        if count > best.1 {
            best = (candidate, count);
        }
    }
    best.0
}

/// Rows plus the header column count
fn read_rows(
    text: &str,
    delimiter: u8,
    flexible: bool,
) -> Result<(usize, Vec<RawRow>), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(flexible)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = RawRow::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            if header.is_empty() || value.is_empty() {
                continue;
            }
            row.insert(header.to_string(), Value::String(value.to_string()));
        }
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok((headers.len(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_url_passthrough() {
        let url = export_url(" https://example.com/pub?output=csv ", "Sheet1").unwrap();
        assert_eq!(url, "https://example.com/pub?output=csv");
    }

    #[test]
    fn test_export_url_from_bare_id() {
        let url = export_url("1AbC-xyz", "Fleet Status").unwrap();
        assert!(url.starts_with("https://docs.google.com/spreadsheets/d/1AbC-xyz/gviz/tq?"));
        assert!(url.contains("tqx=out%3Acsv"));
        assert!(url.contains("sheet=Fleet+Status"));
    }

    #[test]
    fn test_export_url_rejects_garbage() {
        assert!(matches!(export_url("not/a/url", "Sheet1"), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_parse_comma_rows() {
        let text = "HGV_Number,Status,Location,Driver\n1,VOR,Depot,\n2,On Route,M62,Sam\n";
        let rows = parse_delimited(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["HGV_Number"], Value::String("1".into()));
        assert!(!rows[0].contains_key("Driver"));
        assert_eq!(rows[1]["Status"], Value::String("On Route".into()));
    }

    #[test]
    fn test_parse_sniffs_semicolon_and_strips_bom() {
        let text = "\u{feff}id;status\n7;Yard\n";
        let rows = parse_delimited(text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::String("7".into()));
    }

    #[test]
    fn test_parse_recovers_ragged_rows_with_comma_retry() {
        // Trailing comma gives the second record an extra field
        let text = "HGV_Number,Status\n1,VOR\n2,Yard,\n";
        let rows = parse_delimited(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["Status"], Value::String("Yard".into()));
    }

    #[test]
    fn test_ragged_semicolon_rows_are_a_parse_error() {
        let err = parse_delimited("id;status\n1;VOR\n2;Yard;\n").unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn test_ragged_tab_rows_with_commas_in_header_still_recover() {
        // Tab sniffed but strict parse fails; the header also splits on commas
        let text = "HGV_Number,Status\tLocation\tDriver\n1,VOR\tDepot\n";
        let rows = parse_delimited(text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["HGV_Number"], Value::String("1".into()));
    }

    #[test]
    fn test_sniff_defaults_to_comma() {
        assert_eq!(sniff_delimiter("single_column\n1\n"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc\n"), b'\t');
        assert_eq!(sniff_delimiter("a|b\n"), b'|');
    }
}
