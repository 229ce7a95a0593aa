//! Run orchestration: discover, then per resource fetch -> extract ->
//! normalize -> buffer, flushing the buffer to the warehouse as it grows.

use std::fmt;
use std::time::Instant;

use ida_collector::IdaResource;
use serde::Serialize;
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::dimensions::ensure_dimensions;
use crate::error::{LoadError, PipelineError, ResourceError};
use crate::extract::{Extractors, SheetMeta, SourceFormat};
use crate::loader::{FactLoader, LoadOutcome, DEFAULT_BATCH_SIZE};
use crate::model::NormalizedRecord;
use crate::normalize::{normalize_table, NormalizeReport};
use crate::source::ResourceSource;
use crate::warehouse::Warehouse;

pub const DEFAULT_FLUSH_MULTIPLIER: usize = 5;

/// What a run did. Produced on every path that gets past preflight.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub duration_secs: f64,
    pub resources_attempted: usize,
    pub resources_processed: usize,
    /// Data rows read from the sheets.
    pub records_extracted: usize,
    pub records_transformed: usize,
    pub records_loaded: u64,
    pub duplicates_skipped: u64,
    pub unresolved_references: u64,
    pub cells_rejected: usize,
    pub errors: Vec<String>,
}

impl RunSummary {
    /// Records were transformed but none loaded, and not because they were
    /// all already present. Usually a missing or misconfigured dimension.
    pub fn load_anomaly(&self) -> bool {
        self.records_transformed > 0
            && self.records_loaded == 0
            && (self.unresolved_references > 0 || self.duplicates_skipped == 0)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// 0 without errors, 1 with resource-level errors.
    pub fn exit_code(&self) -> u8 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }

    fn record_load(&mut self, outcome: &LoadOutcome) {
        self.records_loaded += outcome.facts.inserted;
        self.duplicates_skipped += outcome.facts.duplicates;
        self.unresolved_references += outcome.facts.unresolved;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary ===")?;
        writeln!(f, "Duration:              {:.1}s", self.duration_secs)?;
        writeln!(
            f,
            "Resources processed:   {}/{}",
            self.resources_processed, self.resources_attempted
        )?;
        writeln!(f, "Records extracted:     {}", self.records_extracted)?;
        writeln!(f, "Records transformed:   {}", self.records_transformed)?;
        writeln!(f, "Records loaded:        {}", self.records_loaded)?;
        writeln!(f, "Duplicates skipped:    {}", self.duplicates_skipped)?;
        writeln!(f, "Unresolved references: {}", self.unresolved_references)?;
        writeln!(f, "Cells rejected:        {}", self.cells_rejected)?;
        if self.errors.is_empty() {
            write!(f, "Errors:                none")
        } else {
            write!(f, "Errors ({}):", self.errors.len())?;
            for err in &self.errors {
                write!(f, "\n  - {err}")?;
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub batch_size: usize,
    /// The buffer is flushed once it holds `batch_size * flush_multiplier` records.
    pub flush_multiplier: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_multiplier: DEFAULT_FLUSH_MULTIPLIER,
        }
    }
}

pub struct Pipeline<'a> {
    warehouse: &'a dyn Warehouse,
    source: &'a dyn ResourceSource,
    extractors: Extractors,
    loader: FactLoader,
    flush_threshold: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        warehouse: &'a dyn Warehouse,
        source: &'a dyn ResourceSource,
        settings: PipelineSettings,
    ) -> Self {
        let loader = FactLoader::new(settings.batch_size);
        let flush_threshold = loader
            .batch_size()
            .saturating_mul(settings.flush_multiplier.max(1));
        Self {
            warehouse,
            source,
            extractors: Extractors::default(),
            loader,
            flush_threshold,
        }
    }

    pub fn with_extractors(mut self, extractors: Extractors) -> Self {
        self.extractors = extractors;
        self
    }

    /// Run the whole pipeline.
    ///
    /// Only a failed preflight or a failed final flush is an error; anything
    /// that goes wrong with a single resource is recorded in the summary.
    #[instrument(skip(self), fields(warehouse = self.warehouse.name()))]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        self.warehouse
            .check_ready()
            .await
            .map_err(PipelineError::Preflight)?;

        let resources = match self.source.discover().await {
            Ok(resources) => resources,
            Err(e) => {
                error!(error = %e, "resource discovery failed");
                summary.errors.push(format!("discovery: {e}"));
                summary.duration_secs = started.elapsed().as_secs_f64();
                return Ok(summary);
            }
        };
        info!(resources = resources.len(), "resources discovered");

        let mut buffer: Vec<NormalizedRecord> = Vec::new();

        for resource in &resources {
            summary.resources_attempted += 1;
            let span = info_span!("resource", file = %resource.file_name(), id = %resource.id);

            match self.process_resource(resource).instrument(span).await {
                Ok((rows, report)) => {
                    summary.resources_processed += 1;
                    summary.records_extracted += rows;
                    summary.records_transformed += report.records.len();
                    summary.cells_rejected += report.cells_rejected;
                    buffer.extend(report.records);
                }
                Err(e) => {
                    warn!(file = %resource.file_name(), error = %e, "resource skipped");
                    summary.errors.push(format!("{}: {e}", resource.file_name()));
                    continue;
                }
            }

            if buffer.len() >= self.flush_threshold {
                let pending = std::mem::take(&mut buffer);
                if let Err(e) = self.flush(&pending, &mut summary).await {
                    error!(error = %e, dropped = pending.len(), "flush failed, continuing");
                    summary.errors.push(format!("flush: {e}"));
                }
            }
        }

        if let Err(e) = self.flush(&buffer, &mut summary).await {
            summary.duration_secs = started.elapsed().as_secs_f64();
            error!(error = %e, "final flush failed");
            return Err(PipelineError::FinalFlush {
                source: e,
                summary: Box::new(summary),
            });
        }

        summary.duration_secs = started.elapsed().as_secs_f64();
        if summary.load_anomaly() {
            warn!(
                transformed = summary.records_transformed,
                unresolved = summary.unresolved_references,
                "records transformed but none loaded"
            );
        }
        info!(
            loaded = summary.records_loaded,
            errors = summary.errors.len(),
            duration_secs = summary.duration_secs,
            "run finished"
        );

        Ok(summary)
    }

    /// Returns the number of extracted rows and the normalized records.
    async fn process_resource(
        &self,
        resource: &IdaResource,
    ) -> Result<(usize, NormalizeReport), ResourceError> {
        let format = SourceFormat::detect(&resource.format, &resource.url)?;
        let extractor = self.extractors.get(format)?;

        let bytes = self.source.fetch(resource).await?;
        info!(bytes = bytes.len(), "resource downloaded");

        let meta = SheetMeta {
            service: resource.service.clone(),
            source_file: resource.file_name(),
        };
        let table = extractor.extract(&bytes, &meta)?;
        let report = normalize_table(&table);
        Ok((table.rows.len(), report))
    }

    /// Ensure dimensions, then load. Rows committed by batches before a
    /// failing one are still counted as loaded.
    async fn flush(
        &self,
        records: &[NormalizedRecord],
        summary: &mut RunSummary,
    ) -> Result<(), LoadError> {
        if records.is_empty() {
            return Ok(());
        }
        info!(records = records.len(), "flushing buffer");

        ensure_dimensions(self.warehouse, records).await?;
        match self.loader.load(self.warehouse, records).await {
            Ok(outcome) => {
                summary.record_load(&outcome);
                Ok(())
            }
            Err(e) => {
                summary.records_loaded += e.committed_rows();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{grid_extractors, resource, FailingWarehouse, StaticSource};
    use crate::warehouse::MemoryWarehouse;
    use chrono::NaiveDate;

    const CLARO_SHEET: &str = "\
Índice de Desempenho no Atendimento
GRUPO ECONÔMICO|VARIÁVEL|2018-01|2018-02
CLARO S.A.|Indicador de Desempenho no Atendimento (IDA)|0,85|-";

    const SCM_SHEET: &str = "\
Banda Larga Fixa
|
GRUPO ECONÔMICO|VARIÁVEL|2018-01|2018-02|2018-03
OI S.A.|Taxa de Reabertas|1,5%|2,5%|n/d
|Taxa de Respondidas no Período|90|91|92
TIM S.A.|Taxa de Reabertas|3|-|4";

    fn settings(batch_size: usize, flush_multiplier: usize) -> PipelineSettings {
        PipelineSettings {
            batch_size,
            flush_multiplier,
        }
    }

    async fn run(
        warehouse: &dyn Warehouse,
        source: &StaticSource,
        settings: PipelineSettings,
    ) -> Result<RunSummary, PipelineError> {
        Pipeline::new(warehouse, source, settings)
            .with_extractors(grid_extractors())
            .run()
            .await
    }

    #[tokio::test]
    async fn test_single_record_end_to_end() {
        let warehouse = MemoryWarehouse::new();
        let source = StaticSource::new().with_sheet("SMP", 2018, CLARO_SHEET);

        let summary = run(&warehouse, &source, PipelineSettings::default()).await.unwrap();

        assert_eq!(summary.resources_processed, 1);
        assert_eq!(summary.records_extracted, 1);
        assert_eq!(summary.records_transformed, 1);
        assert_eq!(summary.records_loaded, 1);
        assert_eq!(summary.exit_code(), 0);

        let facts = warehouse.facts().unwrap();
        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert_eq!(fact.period, NaiveDate::from_ymd_opt(2018, 1, 1).unwrap());
        assert_eq!(fact.economic_group, "CLARO");
        assert_eq!(fact.service, "SMP");
        assert_eq!(fact.variable, "IDA");
        assert_eq!(fact.value, 0.85);
        assert_eq!(fact.source_file, "SMP_2018.ods");
    }

    #[tokio::test]
    async fn test_forward_fill_and_bad_cells_through_the_pipeline() {
        let warehouse = MemoryWarehouse::new();
        let source = StaticSource::new().with_sheet("SCM", 2018, SCM_SHEET);

        let summary = run(&warehouse, &source, PipelineSettings::default()).await.unwrap();

        // OI: 2 reabertas + 3 respondidas (forward-filled), TIM: 2.
        assert_eq!(summary.records_transformed, 7);
        assert_eq!(summary.records_loaded, 7);
        assert_eq!(summary.cells_rejected, 1);

        let oi_rows = warehouse
            .facts()
            .unwrap()
            .into_iter()
            .filter(|f| f.economic_group == "OI")
            .count();
        assert_eq!(oi_rows, 5);
    }

    #[tokio::test]
    async fn test_rerun_loads_nothing_new() {
        let warehouse = MemoryWarehouse::new();
        let source = StaticSource::new()
            .with_sheet("SMP", 2018, CLARO_SHEET)
            .with_sheet("SCM", 2018, SCM_SHEET);

        let first = run(&warehouse, &source, settings(2, 1)).await.unwrap();
        let count = warehouse.fact_count().await.unwrap();
        assert_eq!(first.records_loaded, count);

        let second = run(&warehouse, &source, settings(2, 1)).await.unwrap();
        assert_eq!(second.records_loaded, 0);
        assert_eq!(second.duplicates_skipped, count);
        assert!(!second.load_anomaly());
        assert_eq!(warehouse.fact_count().await.unwrap(), count);
    }

    #[tokio::test]
    async fn test_bad_resources_do_not_abort_the_run() {
        let warehouse = MemoryWarehouse::new();
        let mut seac = resource("SEAC", 2018);
        seac.title = "IDA SEAC 2018".to_string();
        let source = StaticSource::new()
            .with_resource(seac, CLARO_SHEET)
            .with_missing("STFC", 2018)
            .with_sheet("SMP", 2019, "not|a|sheet")
            .with_sheet("SMP", 2018, CLARO_SHEET);

        let summary = run(&warehouse, &source, PipelineSettings::default()).await.unwrap();

        assert_eq!(summary.resources_attempted, 4);
        assert_eq!(summary.resources_processed, 1);
        assert_eq!(summary.errors.len(), 3);
        assert!(summary.errors[0].contains("SEAC"));
        assert!(summary.errors[1].contains("404"));
        assert!(summary.errors[2].contains("malformed"));
        assert_eq!(summary.records_loaded, 1);
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_format_is_not_fetched() {
        let warehouse = MemoryWarehouse::new();
        let mut csv = resource("SMP", 2017);
        csv.format = "CSV".to_string();
        csv.url = "https://dados.example.test/SMP_2017.csv".to_string();
        let source = StaticSource::new().with_resource(csv, CLARO_SHEET);

        let summary = run(&warehouse, &source, PipelineSettings::default()).await.unwrap();

        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("CSV"));
        assert_eq!(source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_preflight_failure_aborts_before_any_fetch() {
        let warehouse = MemoryWarehouse::unprovisioned();
        let source = StaticSource::new().with_sheet("SMP", 2018, CLARO_SHEET);

        let err = run(&warehouse, &source, PipelineSettings::default()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Preflight(LoadError::NotReady(_))));
        assert_eq!(source.discover_calls(), 0);
        assert_eq!(source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_recorded() {
        let warehouse = MemoryWarehouse::new();
        let source = StaticSource::unreachable();

        let summary = run(&warehouse, &source, PipelineSettings::default()).await.unwrap();

        assert_eq!(summary.resources_attempted, 0);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("discovery"));
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_mid_run_flush_failure_continues() {
        // Threshold of one record: every resource is flushed on its own.
        let warehouse = FailingWarehouse::fail_batch(0);
        let source = StaticSource::new()
            .with_sheet("SMP", 2018, CLARO_SHEET)
            .with_sheet("SCM", 2018, SCM_SHEET);

        let summary = run(&warehouse, &source, settings(1, 1)).await.unwrap();

        assert_eq!(summary.resources_processed, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("flush"));
        assert_eq!(summary.records_loaded, 7);
        assert_eq!(warehouse.inner().fact_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_final_flush_failure_is_fatal() {
        let warehouse = FailingWarehouse::fail_batch(1);
        let source = StaticSource::new().with_sheet("SCM", 2018, SCM_SHEET);

        let err = run(&warehouse, &source, settings(5, 10)).await.unwrap_err();

        match err {
            PipelineError::FinalFlush { source, summary } => {
                assert_eq!(source.committed_rows(), 5);
                assert_eq!(summary.records_transformed, 7);
                assert_eq!(summary.records_loaded, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(warehouse.inner().fact_count().await.unwrap(), 5);
    }

    #[test]
    fn test_load_anomaly() {
        let mut summary = RunSummary {
            records_transformed: 10,
            ..RunSummary::default()
        };
        assert!(summary.load_anomaly());

        summary.duplicates_skipped = 10;
        assert!(!summary.load_anomaly());

        summary.unresolved_references = 1;
        assert!(summary.load_anomaly());

        summary.records_loaded = 1;
        assert!(!summary.load_anomaly());

        assert!(!RunSummary::default().load_anomaly());
    }

    #[test]
    fn test_summary_renders_errors() {
        let summary = RunSummary {
            resources_attempted: 2,
            resources_processed: 1,
            errors: vec!["STFC_2018.ods: status 404".to_string()],
            ..RunSummary::default()
        };
        let text = summary.to_string();
        assert!(text.contains("Resources processed:   1/2"));
        assert!(text.contains("- STFC_2018.ods: status 404"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["resources_attempted"], 2);
        assert_eq!(json["errors"][0], "STFC_2018.ods: status 404");
    }
}
