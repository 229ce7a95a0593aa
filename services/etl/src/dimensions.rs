//! Dimension rows derived from normalized records.
//!
//! The warehouse only ever inserts these when their natural key is absent;
//! existing rows are never updated.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use tracing::{debug, instrument};

use crate::error::LoadError;
use crate::model::NormalizedRecord;
use crate::normalize::{group_legal_name, variable_label};
use crate::warehouse::Warehouse;

pub const MONTH_NAMES: [&str; 12] = [
    "Janeiro",
    "Fevereiro",
    "Março",
    "Abril",
    "Maio",
    "Junho",
    "Julho",
    "Agosto",
    "Setembro",
    "Outubro",
    "Novembro",
    "Dezembro",
];

/// Full names of the regulated services.
pub const SERVICE_NAMES: &[(&str, &str)] = &[
    ("SMP", "Serviço Móvel Pessoal"),
    ("SCM", "Serviço de Comunicação Multimídia"),
    ("STFC", "Serviço Telefônico Fixo Comutado"),
];

/// A row of the time dimension. Quarter and half are calendar based.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeEntry {
    pub period: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub month_name: &'static str,
    pub quarter: u32,
    pub half: u32,
}

impl TimeEntry {
    /// Derive the attributes of the month containing `date`.
    pub fn from_period(date: NaiveDate) -> Self {
        let month = date.month();
        Self {
            period: date.with_day(1).unwrap_or(date),
            year: date.year(),
            month,
            month_name: MONTH_NAMES[(month - 1) as usize],
            quarter: (month - 1) / 3 + 1,
            half: (month - 1) / 6 + 1,
        }
    }
}

/// A row of a code-keyed dimension (group, service, variable).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CodedEntry {
    pub code: String,
    /// Descriptive label; the code itself when nothing richer is known.
    pub name: String,
}

impl CodedEntry {
    fn labelled(code: &str, label: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            name: label.unwrap_or(code).to_string(),
        }
    }
}

/// Distinct dimension members referenced by a set of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionRows {
    pub times: Vec<TimeEntry>,
    pub groups: Vec<CodedEntry>,
    pub services: Vec<CodedEntry>,
    pub variables: Vec<CodedEntry>,
}

impl DimensionRows {
    pub fn from_records(records: &[NormalizedRecord]) -> Self {
        let periods: BTreeSet<NaiveDate> = records.iter().map(|r| r.period).collect();
        let groups: BTreeSet<&str> = records.iter().map(|r| r.economic_group.as_str()).collect();
        let services: BTreeSet<&str> = records.iter().map(|r| r.service.as_str()).collect();
        let variables: BTreeSet<&str> = records.iter().map(|r| r.variable.as_str()).collect();

        // Two dates of the same month collapse into one time row.
        let times: BTreeMap<NaiveDate, TimeEntry> = periods
            .into_iter()
            .map(TimeEntry::from_period)
            .map(|t| (t.period, t))
            .collect();

        Self {
            times: times.into_values().collect(),
            groups: groups
                .into_iter()
                .map(|code| CodedEntry::labelled(code, group_legal_name(code)))
                .collect(),
            services: services
                .into_iter()
                .map(|code| CodedEntry::labelled(code, service_name(code)))
                .collect(),
            variables: variables
                .into_iter()
                .map(|code| CodedEntry::labelled(code, variable_label(code)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
            && self.groups.is_empty()
            && self.services.is_empty()
            && self.variables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.times.len() + self.groups.len() + self.services.len() + self.variables.len()
    }
}

pub fn service_name(code: &str) -> Option<&'static str> {
    SERVICE_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Make sure every dimension member referenced by `records` exists.
///
/// Returns the number of rows that were actually created.
#[instrument(skip_all, fields(records = records.len()))]
pub async fn ensure_dimensions(
    warehouse: &dyn Warehouse,
    records: &[NormalizedRecord],
) -> Result<u64, LoadError> {
    let rows = DimensionRows::from_records(records);
    if rows.is_empty() {
        return Ok(0);
    }
    let created = warehouse.ensure_dimensions(&rows).await?;
    debug!(
        referenced = rows.len(),
        created, "dimensions ensured"
    );
    Ok(created)
}
