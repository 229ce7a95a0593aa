//! Star-schema storage backends.

mod memory;
mod postgres;

pub use memory::MemoryWarehouse;
pub use postgres::{PgWarehouse, PoolSettings, REQUIRED_TABLES, SCHEMA};

use async_trait::async_trait;

use crate::dimensions::DimensionRows;
use crate::error::LoadError;
use crate::model::NormalizedRecord;

/// What happened to the records of one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: u64,
    /// Content hash already present.
    pub duplicates: u64,
    /// No matching dimension row; the record was skipped.
    pub unresolved: u64,
}

impl BatchOutcome {
    pub fn attempted(&self) -> u64 {
        self.inserted + self.duplicates + self.unresolved
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.unresolved += other.unresolved;
    }
}

/// The fact store the pipeline loads into.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Verify the schema and every required table are reachable.
    async fn check_ready(&self) -> Result<(), LoadError>;

    /// Insert absent dimension rows; returns how many were created.
    async fn ensure_dimensions(&self, rows: &DimensionRows) -> Result<u64, LoadError>;

    /// Insert one batch atomically. Duplicate hashes and unresolved
    /// references are skipped, not errors.
    async fn insert_fact_batch(&self, batch: &[NormalizedRecord]) -> Result<BatchOutcome, LoadError>;

    async fn fact_count(&self) -> Result<u64, LoadError>;

    /// Release connections. Safe to call more than once.
    async fn close(&self);
}
