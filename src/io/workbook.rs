//! Uploaded workbook (xlsx / xls / ods) via calamine
//!
//! Decoding is synchronous and CPU bound, so it runs on the blocking pool.

use crate::domain::error::SyncError;
use crate::domain::source::SourceType;
use crate::domain::types::RawRow;
use crate::io::adapter::SourceAdapter;
use async_trait::async_trait;
use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use serde_json::{Number, Value};
use std::io::Cursor;
use tracing::debug;

pub struct FileUploadAdapter {
    file: Option<Bytes>,
    sheet_name: String,
}

impl FileUploadAdapter {
    pub fn new(file: Option<Bytes>, sheet_name: &str) -> Self {
        Self { file, sheet_name: sheet_name.to_string() }
    }
}

#[async_trait]
impl SourceAdapter for FileUploadAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::FileUpload
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SyncError> {
        let bytes = self.file.clone().ok_or(SyncError::NoFileSelected)?;
        let sheet_name = self.sheet_name.clone();
        tokio::task::spawn_blocking(move || read_workbook(bytes, &sheet_name))
            .await
            .map_err(|e| SyncError::Parse(format!("workbook decode task failed: {}", e)))?
    }
}

/// Decode workbook bytes and convert the selected sheet into rows
pub fn read_workbook(bytes: Bytes, sheet_name: &str) -> Result<Vec<RawRow>, SyncError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| SyncError::Parse(format!("not a readable workbook: {}", e)))?;

    let selected = select_sheet(&workbook.sheet_names(), sheet_name)?;
    let range = workbook
        .worksheet_range(&selected)
        .map_err(|e| SyncError::Parse(format!("sheet \"{}\": {}", selected, e)))?;

    let rows = rows_from_range(&range);
    debug!(sheet = %selected, rows = %rows.len(), "workbook_read");
    Ok(rows)
}

/// Named sheet, or the first one when no name is configured
pub fn select_sheet(available: &[String], wanted: &str) -> Result<String, SyncError> {
    let wanted = wanted.trim();
    if wanted.is_empty() {
        return available
            .first()
            .cloned()
            .ok_or_else(|| SyncError::Parse("workbook has no sheets".to_string()));
    }
    if available.iter().any(|name| name == wanted) {
        Ok(wanted.to_string())
    } else {
        Err(SyncError::SheetNotFound { requested: wanted.to_string(), available: available.to_vec() })
    }
}

/// First row is the header; blank headers and empty cells are skipped
pub fn rows_from_range(range: &Range<Data>) -> Vec<RawRow> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header.iter().map(|cell| cell.to_string().trim().to_string()).collect();

    rows.filter_map(|cells| {
        let mut row = RawRow::new();
        for (name, cell) in headers.iter().zip(cells) {
            if name.is_empty() {
                continue;
            }
            if let Some(value) = cell_value(cell) {
                row.insert(name.clone(), value);
            }
        }
        (!row.is_empty()).then_some(row)
    })
    .collect()
}

fn cell_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::Int(i) => Some(Value::from(*i)),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
        }
        other => Some(Value::String(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_named_sheet() {
        let available = names(&["Summary", "Sheet1"]);
        assert_eq!(select_sheet(&available, "Sheet1").unwrap(), "Sheet1");
    }

    #[test]
    fn test_empty_name_selects_first() {
        let available = names(&["Fleet", "Drivers"]);
        assert_eq!(select_sheet(&available, "  ").unwrap(), "Fleet");
        assert!(matches!(select_sheet(&[], ""), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_missing_sheet_lists_available() {
        let available = names(&["Fleet", "Drivers"]);
        let err = select_sheet(&available, "Sheet1").unwrap_err();
        assert_eq!(
            err,
            SyncError::SheetNotFound { requested: "Sheet1".to_string(), available }
        );
    }

    #[test]
    fn test_rows_from_range_uses_header() {
        let mut range: Range<Data> = Range::new((0, 0), (2, 3));
        range.set_value((0, 0), Data::String("HGV_Number".into()));
        range.set_value((0, 1), Data::String("Status".into()));
        range.set_value((0, 2), Data::String("Driver".into()));
        range.set_value((1, 0), Data::Float(4.0));
        range.set_value((1, 1), Data::String("VOR".into()));
        range.set_value((2, 0), Data::Int(5));
        range.set_value((2, 2), Data::String("  ".into()));
        range.set_value((2, 3), Data::String("no header".into()));

        let rows = rows_from_range(&range);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["HGV_Number"], Value::from(4.0));
        assert_eq!(rows[0]["Status"], Value::String("VOR".into()));
        assert!(!rows[0].contains_key("Driver"));
        assert_eq!(rows[1]["HGV_Number"], Value::from(5));
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn test_garbage_bytes_are_parse_error() {
        let err = read_workbook(Bytes::from_static(b"definitely not a spreadsheet"), "Sheet1");
        assert!(matches!(err, Err(SyncError::Parse(_))));
    }

    #[tokio::test]
    async fn test_no_file_selected() {
        let adapter = FileUploadAdapter::new(None, "Sheet1");
        assert_eq!(adapter.fetch_rows().await, Err(SyncError::NoFileSelected));
    }
}
