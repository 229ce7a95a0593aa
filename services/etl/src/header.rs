//! Header row detection for human-authored sheets.
//!
//! Source sheets carry a variable number of banner rows above the table. The
//! header is the first row, within [`SEARCH_ROWS`], that either labels the
//! group/variable columns or carries a `YYYY-MM` month label.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::{CellValue, RawGrid};

/// Number of leading rows scanned.
pub const SEARCH_ROWS: usize = 20;
/// Row used when nothing in the scanned rows looks like a header.
pub const FALLBACK_ROW: usize = 8;

static YEAR_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}").expect("static regex"));

/// How the header row was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatch {
    /// Row holds both a GRUPO and a VARIAVEL label.
    Labels(usize),
    /// Row holds a year-month label.
    MonthPattern(usize),
    /// Nothing matched; the fixed fallback row is assumed.
    Fallback(usize),
}

impl HeaderMatch {
    pub fn row(self) -> usize {
        match self {
            HeaderMatch::Labels(r) | HeaderMatch::MonthPattern(r) | HeaderMatch::Fallback(r) => r,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, HeaderMatch::Fallback(_))
    }
}

/// Locate the header row of `grid`. Never fails.
pub fn locate_header(grid: &RawGrid) -> HeaderMatch {
    for (idx, row) in grid.rows().iter().take(SEARCH_ROWS).enumerate() {
        let normalized: Vec<String> = row.iter().map(normalize_cell).collect();

        let has_group = normalized.iter().any(|v| v.contains("GRUPO"));
        let has_variable = normalized.iter().any(|v| v.contains("VARIAVEL"));
        if has_group && has_variable {
            return HeaderMatch::Labels(idx);
        }

        if normalized.iter().any(|v| YEAR_MONTH.is_match(v)) {
            return HeaderMatch::MonthPattern(idx);
        }
    }

    HeaderMatch::Fallback(FALLBACK_ROW)
}

/// Uppercase, trim and strip diacritics, so `Variável` reads as `VARIAVEL`.
fn normalize_cell(cell: &CellValue) -> String {
    cell.display_text()
        .trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_uppercase()
}
