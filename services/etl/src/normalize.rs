//! Unpivot of extracted tables into [`NormalizedRecord`]s.
//!
//! One record per (row, month column) whose cell holds a number. Bad cells
//! are skipped and counted; nothing here fails a resource.

use chrono::{Datelike, NaiveDate};
use tracing::{debug, error, info, instrument, warn};

use crate::model::{CellValue, ColumnLabel, ExtractedTable, NormalizedRecord};

/// Legal names of well-known economic groups -> short codes.
pub const GROUP_CANONICAL: &[(&str, &str)] = &[
    ("ALGAR TELECOM S/A", "ALGAR"),
    ("CLARO S.A.", "CLARO"),
    ("TELEFÔNICA BRASIL S.A.", "VIVO"),
    ("TIM S.A.", "TIM"),
    ("OI S.A.", "OI"),
    ("NET SERVIÇOS DE COMUNICAÇÃO S.A.", "NET"),
    ("SKY BRASIL SERVIÇOS LTDA.", "SKY"),
    ("EMPRESA BRASILEIRA DE TELECOMUNICAÇÕES S.A. - EMBRATEL", "EMBRATEL"),
    ("NEXTEL TELECOMUNICAÇÕES LTDA.", "NEXTEL"),
    ("SERCOMTEL S.A. TELECOMUNICAÇÕES", "SERCOMTEL"),
];

/// Published variable labels -> short variable codes.
pub const VARIABLE_CANONICAL: &[(&str, &str)] = &[
    ("Indicador de Desempenho no Atendimento (IDA)", "IDA"),
    ("Índice de Reclamações", "INDICE_RECL"),
    ("Quantidade de acessos em serviço", "QTD_ACESSOS"),
    ("Quantidade de reabertas", "QTD_REABERTAS"),
    ("Quantidade de reclamações", "QTD_RECLAMACOES"),
    ("Quantidade de Reclamações no Período", "QTD_RECL_PERIODO"),
    ("Quantidade de Respondidas", "QTD_RESPONDIDAS"),
    ("Quantidade de Sol. Respondidas em até 5 dias", "QTD_RESP_5DIAS"),
    ("Quantidade de Sol. Respondidas no Período", "QTD_RESP_PERIODO"),
    ("Taxa de Reabertas", "TAXA_REABERTAS"),
    ("Taxa de Respondidas em 5 dias Úteis", "TAXA_RESP_5DIAS"),
    ("Taxa de Respondidas no Período", "TAXA_RESP_PERIODO"),
];

const MIN_YEAR: i32 = 2000;
const MAX_YEAR: i32 = 2030;
const REJECTED_SAMPLES: usize = 3;

/// Cell texts that mean "no value published".
const BLANK_MARKERS: &[&str] = &["-", "", "nan"];

// =============================================================================
// Cleaning
// =============================================================================

/// Trim and collapse internal whitespace runs to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn reverse_lookup(table: &'static [(&'static str, &'static str)], code: &str) -> Option<&'static str> {
    table.iter().find(|(_, v)| *v == code).map(|(k, _)| *k)
}

/// Short code for a group label; unknown groups pass through cleaned.
pub fn canonical_group(label: &str) -> String {
    let cleaned = collapse_whitespace(label);
    lookup(GROUP_CANONICAL, &cleaned)
        .map(str::to_string)
        .unwrap_or(cleaned)
}

/// Short code for a variable label; unknown variables pass through cleaned.
pub fn canonical_variable(label: &str) -> String {
    let cleaned = collapse_whitespace(label);
    lookup(VARIABLE_CANONICAL, &cleaned)
        .map(str::to_string)
        .unwrap_or(cleaned)
}

/// Legal name behind a group code, when the code is a known one.
pub fn group_legal_name(code: &str) -> Option<&'static str> {
    reverse_lookup(GROUP_CANONICAL, code)
}

/// Published label behind a variable code, when the code is a known one.
pub fn variable_label(code: &str) -> Option<&'static str> {
    reverse_lookup(VARIABLE_CANONICAL, code)
}

// =============================================================================
// Month Columns
// =============================================================================

/// First day of the month a column stands for, if it is a month column.
///
/// Text labels must be exactly `YYYY-MM` with the year in 2000..=2030;
/// date labels are truncated to their year and month.
pub fn month_of_column(label: &ColumnLabel) -> Option<NaiveDate> {
    match label {
        ColumnLabel::Date(dt) => NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1),
        ColumnLabel::Text(text) => {
            let text = text.trim();
            if text.len() != 7 || !text.is_ascii() || text.as_bytes()[4] != b'-' {
                return None;
            }
            let year: i32 = text[..4].parse().ok()?;
            let month: u32 = text[5..].parse().ok()?;
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) || !(1..=12).contains(&month) {
                return None;
            }
            NaiveDate::from_ymd_opt(year, month, 1)
        }
    }
}

pub fn is_month_column(label: &ColumnLabel) -> bool {
    month_of_column(label).is_some()
}

// =============================================================================
// Values
// =============================================================================

/// What a month cell turned out to hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellOutcome {
    Value(f64),
    /// Nothing published for that month.
    Blank,
    /// Something was there but it is not a number.
    Unparseable,
}

/// Parse a month cell: decimal comma, trailing percent sign.
pub fn parse_value(cell: &CellValue) -> CellOutcome {
    match cell {
        CellValue::Empty => CellOutcome::Blank,
        CellValue::Number(n) if n.is_nan() => CellOutcome::Blank,
        CellValue::Number(n) if n.is_finite() => CellOutcome::Value(*n),
        CellValue::Number(_) => CellOutcome::Unparseable,
        CellValue::Text(raw) => {
            let text = raw.trim();
            if BLANK_MARKERS.contains(&text) {
                return CellOutcome::Blank;
            }
            let cleaned = text.replace(',', ".");
            let cleaned = cleaned.strip_suffix('%').unwrap_or(&cleaned).trim();
            match cleaned.parse::<f64>() {
                Ok(v) if v.is_finite() => CellOutcome::Value(v),
                _ => CellOutcome::Unparseable,
            }
        }
        CellValue::Bool(_) | CellValue::DateTime(_) => CellOutcome::Unparseable,
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Records produced from one table plus what was skipped along the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub records: Vec<NormalizedRecord>,
    pub month_columns: usize,
    /// Rows without a group or a variable.
    pub rows_skipped: usize,
    pub cells_blank: usize,
    pub cells_rejected: usize,
}

fn clean_label(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed == "nan" {
        ""
    } else {
        trimmed
    }
}

/// Unpivot the month columns of `table` into normalized records.
#[instrument(skip(table), fields(file = %table.source_file, service = %table.service))]
pub fn normalize_table(table: &ExtractedTable) -> NormalizeReport {
    let mut report = NormalizeReport::default();

    let month_columns: Vec<(usize, NaiveDate)> = table
        .columns
        .iter()
        .enumerate()
        .filter_map(|(idx, label)| month_of_column(label).map(|period| (idx, period)))
        .collect();
    report.month_columns = month_columns.len();

    if month_columns.is_empty() {
        error!(columns = ?table.columns, "no month columns found");
        return report;
    }
    debug!(month_columns = month_columns.len(), "month columns identified");

    for row in &table.rows {
        let group = clean_label(&row.economic_group);
        let variable = clean_label(&row.variable_label);
        if group.is_empty() || variable.is_empty() {
            report.rows_skipped += 1;
            continue;
        }

        let group_code = canonical_group(group);
        let variable_code = canonical_variable(variable);

        for &(idx, period) in &month_columns {
            let cell = row.values.get(idx).unwrap_or(&CellValue::Empty);
            match parse_value(cell) {
                CellOutcome::Value(value) => report.records.push(NormalizedRecord::new(
                    period,
                    group_code.as_str(),
                    table.service.as_str(),
                    variable_code.as_str(),
                    value,
                    table.source_file.as_str(),
                    row.source_row,
                )),
                CellOutcome::Blank => report.cells_blank += 1,
                CellOutcome::Unparseable => {
                    report.cells_rejected += 1;
                    if report.cells_rejected <= REJECTED_SAMPLES {
                        debug!(row = row.source_row, %period, ?cell, "unparseable cell skipped");
                    }
                }
            }
        }
    }

    if report.cells_rejected > 0 {
        warn!(cells = report.cells_rejected, "cells with unparseable values skipped");
    }
    info!(
        records = report.records.len(),
        rows_skipped = report.rows_skipped,
        "table normalized"
    );

    report
}
