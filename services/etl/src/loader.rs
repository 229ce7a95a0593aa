//! Batched fact loading.

use tracing::{info, instrument, warn};

use crate::error::LoadError;
use crate::model::NormalizedRecord;
use crate::warehouse::{BatchOutcome, Warehouse};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Totals over every batch of one load call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub batches: usize,
    pub facts: BatchOutcome,
}

/// Splits records into fixed-size batches, one transaction each.
#[derive(Debug, Clone, Copy)]
pub struct FactLoader {
    batch_size: usize,
}

impl Default for FactLoader {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl FactLoader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Load `records`, assuming their dimensions exist.
    ///
    /// A failing batch is rolled back and returned as [`LoadError::Batch`];
    /// batches committed before it stay committed.
    #[instrument(skip_all, fields(records = records.len(), batch_size = self.batch_size))]
    pub async fn load(
        &self,
        warehouse: &dyn Warehouse,
        records: &[NormalizedRecord],
    ) -> Result<LoadOutcome, LoadError> {
        let mut outcome = LoadOutcome::default();

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            let result = warehouse.insert_fact_batch(batch).await.map_err(|source| LoadError::Batch {
                index,
                inserted_before: outcome.facts.inserted,
                source: Box::new(source),
            })?;

            info!(
                batch = index,
                inserted = result.inserted,
                duplicates = result.duplicates,
                unresolved = result.unresolved,
                "batch loaded"
            );
            if result.unresolved > 0 {
                warn!(batch = index, unresolved = result.unresolved, "records without matching dimensions");
            }

            outcome.batches += 1;
            outcome.facts.merge(result);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::ensure_dimensions;
    use crate::testing::FailingWarehouse;
    use crate::warehouse::MemoryWarehouse;
    use chrono::NaiveDate;

    fn records(n: usize) -> Vec<NormalizedRecord> {
        let period = NaiveDate::from_ymd_opt(2019, 4, 1).unwrap();
        (0..n)
            .map(|i| NormalizedRecord::new(period, "VIVO", "SMP", "IDA", i as f64, "SMP_2019.ods", i as u32))
            .collect()
    }

    #[tokio::test]
    async fn test_records_are_split_into_batches() {
        let warehouse = MemoryWarehouse::new();
        let data = records(25);
        ensure_dimensions(&warehouse, &data).await.unwrap();

        let outcome = FactLoader::new(10).load(&warehouse, &data).await.unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.facts.inserted, 25);
        assert_eq!(warehouse.fact_count().await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_second_load_inserts_nothing() {
        let warehouse = MemoryWarehouse::new();
        let data = records(12);
        ensure_dimensions(&warehouse, &data).await.unwrap();
        let loader = FactLoader::new(5);

        loader.load(&warehouse, &data).await.unwrap();
        let after_first = warehouse.fact_count().await.unwrap();

        let again = loader.load(&warehouse, &data).await.unwrap();
        assert_eq!(again.facts.inserted, 0);
        assert_eq!(again.facts.duplicates, 12);
        assert_eq!(warehouse.fact_count().await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batches() {
        let warehouse = FailingWarehouse::fail_batch(1);
        let data = records(25);
        ensure_dimensions(&warehouse, &data).await.unwrap();

        let err = FactLoader::new(10).load(&warehouse, &data).await.unwrap_err();
        match &err {
            LoadError::Batch {
                index,
                inserted_before,
                ..
            } => {
                assert_eq!(*index, 1);
                assert_eq!(*inserted_before, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Batch 0 committed, batch 1 rolled back entirely, batch 2 never ran.
        assert_eq!(warehouse.fact_count().await.unwrap(), 10);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        assert_eq!(FactLoader::new(0).batch_size(), 1);
        assert_eq!(FactLoader::default().batch_size(), 1000);
    }
}
