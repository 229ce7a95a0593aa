//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ida_collector::{CollectorError, IdaResource};

use crate::dimensions::DimensionRows;
use crate::error::{ExtractError, LoadError};
use crate::extract::{sheet_for_service, table_from_grid, Extractor, Extractors, SheetMeta, SourceFormat};
use crate::model::{CellValue, ExtractedTable, NormalizedRecord, RawGrid};
use crate::source::ResourceSource;
use crate::warehouse::{BatchOutcome, MemoryWarehouse, Warehouse};

// =============================================================================
// Warehouse
// =============================================================================

/// A [`MemoryWarehouse`] whose chosen `insert_fact_batch` calls fail.
pub struct FailingWarehouse {
    inner: MemoryWarehouse,
    failing_calls: Vec<usize>,
    calls: AtomicUsize,
}

impl FailingWarehouse {
    /// Fail the `call`-th batch insert (zero based) across the warehouse's life.
    pub fn fail_batch(call: usize) -> Self {
        Self::fail_batches([call])
    }

    pub fn fail_batches(calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: MemoryWarehouse::new(),
            failing_calls: calls.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryWarehouse {
        &self.inner
    }
}

#[async_trait]
impl Warehouse for FailingWarehouse {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn check_ready(&self) -> Result<(), LoadError> {
        self.inner.check_ready().await
    }

    async fn ensure_dimensions(&self, rows: &DimensionRows) -> Result<u64, LoadError> {
        self.inner.ensure_dimensions(rows).await
    }

    async fn insert_fact_batch(&self, batch: &[NormalizedRecord]) -> Result<BatchOutcome, LoadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.contains(&call) {
            return Err(LoadError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert_fact_batch(batch).await
    }

    async fn fact_count(&self) -> Result<u64, LoadError> {
        self.inner.fact_count().await
    }

    async fn close(&self) {}
}

// =============================================================================
// Resource Source
// =============================================================================

pub fn resource(service: &str, year: i32) -> IdaResource {
    IdaResource {
        id: format!("{service}-{year}"),
        title: format!("Índice de Desempenho no Atendimento - {service} {year}"),
        url: format!("https://dados.example.test/{service}_{year}.ods"),
        format: "ODS".to_string(),
        year,
        service: service.to_string(),
    }
}

/// Serves fixed payloads. A resource without a payload answers 404.
#[derive(Default)]
pub struct StaticSource {
    entries: Vec<(IdaResource, Option<Vec<u8>>)>,
    unreachable: bool,
    discover_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery itself times out.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_sheet(mut self, service: &str, year: i32, sheet: &str) -> Self {
        self.entries
            .push((resource(service, year), Some(sheet.as_bytes().to_vec())));
        self
    }

    pub fn with_resource(mut self, resource: IdaResource, sheet: &str) -> Self {
        self.entries.push((resource, Some(sheet.as_bytes().to_vec())));
        self
    }

    pub fn with_missing(mut self, service: &str, year: i32) -> Self {
        self.entries.push((resource(service, year), None));
        self
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceSource for StaticSource {
    async fn discover(&self) -> Result<Vec<IdaResource>, CollectorError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(CollectorError::Timeout {
                url: "https://dados.example.test/conjuntos-dados".to_string(),
            });
        }
        Ok(self.entries.iter().map(|(r, _)| r.clone()).collect())
    }

    async fn fetch(&self, resource: &IdaResource) -> Result<Vec<u8>, CollectorError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.entries
            .iter()
            .find(|(r, _)| r.id == resource.id)
            .and_then(|(_, bytes)| bytes.clone())
            .ok_or_else(|| CollectorError::Status {
                url: resource.url.clone(),
                status: 404,
            })
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Reads `|`-separated text lines as a sheet, then runs the real header
/// location and forward-fill on them.
pub struct GridExtractor;

impl Extractor for GridExtractor {
    fn extract(&self, bytes: &[u8], meta: &SheetMeta) -> Result<ExtractedTable, ExtractError> {
        let sheet = sheet_for_service(&meta.service)
            .ok_or_else(|| ExtractError::UnknownServiceMapping(meta.service.clone()))?;
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::SheetRead {
            file: meta.source_file.clone(),
            reason: e.to_string(),
        })?;
        table_from_grid(&text_grid(text), meta, sheet)
    }
}

pub fn text_grid(text: &str) -> RawGrid {
    let rows = text
        .lines()
        .map(|line| {
            line.split('|')
                .map(|cell| match cell.trim() {
                    "" => CellValue::Empty,
                    value => CellValue::Text(value.to_string()),
                })
                .collect()
        })
        .collect();
    RawGrid::from_rows(rows)
}

pub fn grid_extractors() -> Extractors {
    let mut extractors = Extractors::default();
    extractors.register(SourceFormat::Ods, Box::new(GridExtractor));
    extractors
}
