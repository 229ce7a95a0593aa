//! Value types that flow between the pipeline stages.
//!
//! Grid cells and extracted rows are transient; a [`NormalizedRecord`] is the
//! immutable fact candidate whose content hash is its deduplication identity.

use chrono::{NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};

/// A single spreadsheet cell, independent of the workbook reader.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Empty cells, whitespace and the literal `nan` carry no data.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => {
                let s = s.trim();
                s.is_empty() || s.eq_ignore_ascii_case("nan")
            }
            _ => false,
        }
    }

    /// Text rendering used when a cell is read as a label.
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// A headerless sheet grid, rows padded so that index (0, 0) is cell A1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrid {
    rows: Vec<Vec<CellValue>>,
}

impl RawGrid {
    pub fn from_rows(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, idx: usize) -> Option<&[CellValue]> {
        self.rows.get(idx).map(Vec::as_slice)
    }
}

/// Column label taken from the located header row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnLabel {
    Text(String),
    /// The header cell held a real date/time value.
    Date(NaiveDateTime),
}

/// One data row below the header, with the first two columns split out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    /// Forward-filled economic group label.
    pub economic_group: String,
    pub variable_label: String,
    /// Raw cells for columns 2.., aligned with [`ExtractedTable::columns`].
    pub values: Vec<CellValue>,
    /// Zero-based index of the row below the header.
    pub source_row: u32,
}

/// Rows of one sheet plus the metadata every row is tagged with.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTable {
    pub service: String,
    pub source_file: String,
    pub header_row: usize,
    /// Labels of columns 2.. of the sheet.
    pub columns: Vec<ColumnLabel>,
    pub rows: Vec<ExtractedRow>,
}

/// The atomic fact candidate produced by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// First day of the reporting month.
    pub period: NaiveDate,
    pub economic_group: String,
    pub service: String,
    pub variable: String,
    pub value: f64,
    pub source_file: String,
    pub source_row: u32,
    pub content_hash: String,
}

impl NormalizedRecord {
    pub fn new(
        period: NaiveDate,
        economic_group: impl Into<String>,
        service: impl Into<String>,
        variable: impl Into<String>,
        value: f64,
        source_file: impl Into<String>,
        source_row: u32,
    ) -> Self {
        let economic_group = economic_group.into();
        let service = service.into();
        let variable = variable.into();
        let content_hash = content_hash(period, &economic_group, &service, &variable, value);

        Self {
            period,
            economic_group,
            service,
            variable,
            value,
            source_file: source_file.into(),
            source_row,
            content_hash,
        }
    }
}

/// SHA-256 over `period|group|service|variable|value`, lowercase hex.
///
/// Provenance (file, row) is not part of the identity: the same measurement
/// published in two files is one fact.
pub fn content_hash(
    period: NaiveDate,
    economic_group: &str,
    service: &str,
    variable: &str,
    value: f64,
) -> String {
    let content = format!(
        "{}|{}|{}|{}|{}",
        period.format("%Y-%m-%d"),
        economic_group,
        service,
        variable,
        value
    );
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jan_2018() -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, 1).unwrap()
    }

    // -------------------------------------------------------------------------
    // CONTENT HASH TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_hash_is_deterministic() {
        let a = NormalizedRecord::new(jan_2018(), "CLARO", "SMP", "IDA", 0.85, "SMP_2018.ods", 3);
        let b = NormalizedRecord::new(jan_2018(), "CLARO", "SMP", "IDA", 0.85, "SMP_2018.ods", 3);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn test_hash_ignores_provenance() {
        let a = NormalizedRecord::new(jan_2018(), "CLARO", "SMP", "IDA", 0.85, "SMP_2018.ods", 3);
        let b = NormalizedRecord::new(jan_2018(), "CLARO", "SMP", "IDA", 0.85, "SMP_2019.ods", 40);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_hash_changes_with_every_key_field() {
        let base = content_hash(jan_2018(), "CLARO", "SMP", "IDA", 0.85);
        let feb = NaiveDate::from_ymd_opt(2018, 2, 1).unwrap();
        let variants = [
            content_hash(feb, "CLARO", "SMP", "IDA", 0.85),
            content_hash(jan_2018(), "TIM", "SMP", "IDA", 0.85),
            content_hash(jan_2018(), "CLARO", "SCM", "IDA", 0.85),
            content_hash(jan_2018(), "CLARO", "SMP", "INDICE_RECL", 0.85),
            content_hash(jan_2018(), "CLARO", "SMP", "IDA", 0.86),
        ];
        for variant in &variants {
            assert_ne!(&base, variant);
        }
    }

    // -------------------------------------------------------------------------
    // CELL TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_blank_cells() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::Text("   ".to_string()).is_blank());
        assert!(CellValue::Text("nan".to_string()).is_blank());
        assert!(!CellValue::Text("-".to_string()).is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }

    #[test]
    fn test_display_text_of_datetime() {
        let dt = jan_2018().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(CellValue::DateTime(dt).display_text(), "2018-01-01 00:00:00");
    }
}
