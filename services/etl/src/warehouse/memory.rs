use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{BatchOutcome, Warehouse};
use crate::dimensions::{DimensionRows, TimeEntry};
use crate::error::LoadError;
use crate::model::NormalizedRecord;

/// A fact row as held by [`MemoryWarehouse`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFact {
    pub period: NaiveDate,
    pub economic_group: String,
    pub service: String,
    pub variable: String,
    pub value: f64,
    pub source_file: String,
    pub source_row: u32,
    pub content_hash: String,
}

#[derive(Debug, Default)]
struct State {
    times: BTreeMap<NaiveDate, TimeEntry>,
    groups: BTreeMap<String, String>,
    services: BTreeMap<String, String>,
    variables: BTreeMap<String, String>,
    facts: HashMap<String, StoredFact>,
}

impl State {
    fn resolves(&self, record: &NormalizedRecord) -> bool {
        self.times.contains_key(&record.period)
            && self.groups.contains_key(&record.economic_group)
            && self.services.contains_key(&record.service)
            && self.variables.contains_key(&record.variable)
    }
}

/// In-process warehouse with the same key semantics as the Postgres one.
#[derive(Debug)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
    provisioned: bool,
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            provisioned: true,
        }
    }

    /// A warehouse whose schema was never created; preflight fails.
    pub fn unprovisioned() -> Self {
        Self {
            provisioned: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LoadError> {
        self.state.lock().map_err(|_| LoadError::Poisoned)
    }

    /// Stored facts ordered by period, group, service and variable.
    pub fn facts(&self) -> Result<Vec<StoredFact>, LoadError> {
        let state = self.lock()?;
        let mut facts: Vec<StoredFact> = state.facts.values().cloned().collect();
        facts.sort_by(|a, b| {
            (a.period, &a.economic_group, &a.service, &a.variable)
                .cmp(&(b.period, &b.economic_group, &b.service, &b.variable))
        });
        Ok(facts)
    }

    pub fn group_name(&self, code: &str) -> Result<Option<String>, LoadError> {
        Ok(self.lock()?.groups.get(code).cloned())
    }

    pub fn time_entry(&self, period: NaiveDate) -> Result<Option<TimeEntry>, LoadError> {
        Ok(self.lock()?.times.get(&period).cloned())
    }
}

fn insert_absent(map: &mut BTreeMap<String, String>, code: &str, name: &str) -> u64 {
    if map.contains_key(code) {
        return 0;
    }
    map.insert(code.to_string(), name.to_string());
    1
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn check_ready(&self) -> Result<(), LoadError> {
        if self.provisioned {
            Ok(())
        } else {
            Err(LoadError::NotReady("schema 'ida' not found".to_string()))
        }
    }

    async fn ensure_dimensions(&self, rows: &DimensionRows) -> Result<u64, LoadError> {
        let mut state = self.lock()?;
        let mut created = 0;

        for time in &rows.times {
            if !state.times.contains_key(&time.period) {
                state.times.insert(time.period, time.clone());
                created += 1;
            }
        }
        for entry in &rows.groups {
            created += insert_absent(&mut state.groups, &entry.code, &entry.name);
        }
        for entry in &rows.services {
            created += insert_absent(&mut state.services, &entry.code, &entry.name);
        }
        for entry in &rows.variables {
            created += insert_absent(&mut state.variables, &entry.code, &entry.name);
        }

        Ok(created)
    }

    async fn insert_fact_batch(&self, batch: &[NormalizedRecord]) -> Result<BatchOutcome, LoadError> {
        let mut state = self.lock()?;
        let mut outcome = BatchOutcome::default();
        let mut staged: Vec<StoredFact> = Vec::new();
        let mut staged_hashes: HashSet<&str> = HashSet::new();

        for record in batch {
            if !state.resolves(record) {
                outcome.unresolved += 1;
                warn!(
                    period = %record.period,
                    group = %record.economic_group,
                    service = %record.service,
                    variable = %record.variable,
                    "fact skipped: no matching dimension row"
                );
                continue;
            }
            let hash = record.content_hash.as_str();
            if state.facts.contains_key(hash) || !staged_hashes.insert(hash) {
                outcome.duplicates += 1;
                continue;
            }
            staged.push(StoredFact {
                period: record.period,
                economic_group: record.economic_group.clone(),
                service: record.service.clone(),
                variable: record.variable.clone(),
                value: record.value,
                source_file: record.source_file.clone(),
                source_row: record.source_row,
                content_hash: record.content_hash.clone(),
            });
        }

        // Commit point: nothing above mutates the store.
        outcome.inserted = staged.len() as u64;
        for fact in staged {
            state.facts.insert(fact.content_hash.clone(), fact);
        }

        debug!(?outcome, "batch committed");
        Ok(outcome)
    }

    async fn fact_count(&self) -> Result<u64, LoadError> {
        Ok(self.lock()?.facts.len() as u64)
    }

    async fn close(&self) {}
}
