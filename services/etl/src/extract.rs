//! Sheet extraction: workbook bytes -> [`ExtractedTable`].
//!
//! The workbook is read once into a [`RawGrid`]; the header row is located on
//! that grid and the rows below it become the table. The first two columns
//! are the economic group and the variable label whatever their header text
//! says, since the labels change between publication years.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{Data, DataType, Ods, Range, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, instrument, warn};

use crate::error::ExtractError;
use crate::header::{locate_header, HeaderMatch};
use crate::model::{CellValue, ColumnLabel, ExtractedRow, ExtractedTable, RawGrid};

/// Service code -> sheet name inside the published workbook.
pub const SHEET_MAPPING: &[(&str, &str)] = &[
    ("SMP", "Móvel_Pessoal"),
    ("SCM", "Banda_Larga_Fixa"),
    ("STFC", "Telefonia_Fixa"),
];

pub fn sheet_for_service(service: &str) -> Option<&'static str> {
    SHEET_MAPPING
        .iter()
        .find(|(code, _)| *code == service)
        .map(|(_, sheet)| *sheet)
}

/// Per-resource metadata every extracted row is tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetMeta {
    pub service: String,
    pub source_file: String,
}

// =============================================================================
// Extractor Interface
// =============================================================================

/// Input formats the pipeline can extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Ods,
}

impl SourceFormat {
    /// Pick the format from the catalog format tag, falling back to the URL suffix.
    pub fn detect(format_tag: &str, url: &str) -> Result<Self, ExtractError> {
        let tag = format_tag.trim().to_lowercase();
        if tag.contains("ods") || tag.contains("opendocument") {
            return Ok(SourceFormat::Ods);
        }
        if url.to_lowercase().ends_with(".ods") {
            return Ok(SourceFormat::Ods);
        }
        Err(ExtractError::UnsupportedFormat(format_tag.to_string()))
    }
}

/// Turns raw workbook bytes into an extracted table.
pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8], meta: &SheetMeta) -> Result<ExtractedTable, ExtractError>;
}

/// Extractors by input format.
pub struct Extractors {
    by_format: HashMap<SourceFormat, Box<dyn Extractor>>,
}

impl Default for Extractors {
    fn default() -> Self {
        let mut extractors = Self {
            by_format: HashMap::new(),
        };
        extractors.register(SourceFormat::Ods, Box::new(OdsExtractor));
        extractors
    }
}

impl Extractors {
    pub fn register(&mut self, format: SourceFormat, extractor: Box<dyn Extractor>) {
        self.by_format.insert(format, extractor);
    }

    pub fn get(&self, format: SourceFormat) -> Result<&dyn Extractor, ExtractError> {
        self.by_format
            .get(&format)
            .map(|e| e.as_ref())
            .ok_or_else(|| ExtractError::UnsupportedFormat(format!("{format:?}")))
    }
}

// =============================================================================
// ODS Extractor
// =============================================================================

/// Reads the service's sheet out of an OpenDocument spreadsheet.
#[derive(Debug, Default, Clone, Copy)]
pub struct OdsExtractor;

impl Extractor for OdsExtractor {
    #[instrument(skip(self, bytes), fields(file = %meta.source_file, service = %meta.service))]
    fn extract(&self, bytes: &[u8], meta: &SheetMeta) -> Result<ExtractedTable, ExtractError> {
        let sheet = sheet_for_service(&meta.service)
            .ok_or_else(|| ExtractError::UnknownServiceMapping(meta.service.clone()))?;

        info!(sheet, bytes = bytes.len(), "extracting sheet");

        let mut workbook: Ods<_> =
            Ods::new(Cursor::new(bytes)).map_err(|e| ExtractError::SheetRead {
                file: meta.source_file.clone(),
                reason: e.to_string(),
            })?;

        let names = workbook.sheet_names();
        if !names.iter().any(|name| name == sheet) {
            return Err(ExtractError::SheetMissing {
                file: meta.source_file.clone(),
                sheet: sheet.to_string(),
                available: names.join(", "),
            });
        }

        let range = workbook
            .worksheet_range(sheet)
            .map_err(|e| ExtractError::SheetRead {
                file: meta.source_file.clone(),
                reason: e.to_string(),
            })?;

        let grid = grid_from_range(&range);
        let table = table_from_grid(&grid, meta, sheet)?;

        info!(rows = table.rows.len(), columns = table.columns.len(), "sheet extracted");
        Ok(table)
    }
}

/// Copy a calamine range into a grid anchored at A1.
pub fn grid_from_range(range: &Range<Data>) -> RawGrid {
    let Some((start_row, start_col)) = range.start() else {
        return RawGrid::default();
    };

    let mut rows: Vec<Vec<CellValue>> = (0..start_row).map(|_| Vec::new()).collect();
    for row in range.rows() {
        let mut cells = vec![CellValue::Empty; start_col as usize];
        cells.extend(row.iter().map(cell_from_data));
        rows.push(cells);
    }

    RawGrid::from_rows(rows)
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(_) => data
            .as_datetime()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Empty),
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

/// ODS stores dates as ISO strings, with or without a time part.
fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// =============================================================================
// Table Building
// =============================================================================

/// Build the extracted table from a headerless grid.
///
/// Rows above the first group are dropped. Only empty group cells (merged
/// cells in the source) inherit the previous group; whitespace or `nan` text
/// stays on its row and is rejected later as a missing group.
pub fn table_from_grid(
    grid: &RawGrid,
    meta: &SheetMeta,
    sheet: &str,
) -> Result<ExtractedTable, ExtractError> {
    let header = locate_header(grid);
    match header {
        HeaderMatch::Fallback(row) => {
            warn!(file = %meta.source_file, sheet, row, "header not detected, using fallback row")
        }
        HeaderMatch::Labels(row) | HeaderMatch::MonthPattern(row) => {
            info!(file = %meta.source_file, sheet, row, ?header, "header row located")
        }
    }

    let header_row = header.row();
    let Some(header_cells) = grid.row(header_row) else {
        return Err(ExtractError::MalformedSheet {
            file: meta.source_file.clone(),
            sheet: sheet.to_string(),
            reason: format!("header row {header_row} is past the end of the sheet"),
        });
    };

    let data_rows = &grid.rows()[header_row + 1..];
    let width = data_rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(header_cells.len()))
        .max()
        .unwrap_or(0);

    if width < 2 {
        return Err(ExtractError::MalformedSheet {
            file: meta.source_file.clone(),
            sheet: sheet.to_string(),
            reason: format!("expected at least two columns, found {width}"),
        });
    }

    let columns: Vec<ColumnLabel> = (2..width)
        .map(|idx| column_label(idx, header_cells.get(idx)))
        .collect();

    let mut rows = Vec::new();
    let mut current_group: Option<String> = None;

    for (offset, cells) in data_rows.iter().enumerate() {
        if cells.iter().all(CellValue::is_blank) {
            continue;
        }

        if let Some(group_cell) = cells.first().filter(|c| !is_empty_cell(c)) {
            current_group = Some(group_cell.display_text());
        }
        let Some(group) = &current_group else {
            continue;
        };

        let variable_label = cells
            .get(1)
            .filter(|c| !c.is_blank())
            .map(CellValue::display_text)
            .unwrap_or_default();

        let values = (2..width)
            .map(|idx| cells.get(idx).cloned().unwrap_or(CellValue::Empty))
            .collect();

        rows.push(ExtractedRow {
            economic_group: group.clone(),
            variable_label,
            values,
            source_row: u32::try_from(offset).unwrap_or(u32::MAX),
        });
    }

    Ok(ExtractedTable {
        service: meta.service.clone(),
        source_file: meta.source_file.clone(),
        header_row,
        columns,
        rows,
    })
}

fn is_empty_cell(cell: &CellValue) -> bool {
    match cell {
        CellValue::Empty => true,
        CellValue::Text(s) => s.is_empty(),
        _ => false,
    }
}

fn column_label(idx: usize, cell: Option<&CellValue>) -> ColumnLabel {
    match cell {
        Some(CellValue::DateTime(dt)) => ColumnLabel::Date(*dt),
        Some(cell) if !cell.is_blank() => ColumnLabel::Text(cell.display_text().trim().to_string()),
        _ => ColumnLabel::Text(format!("Unnamed: {idx}")),
    }
}
