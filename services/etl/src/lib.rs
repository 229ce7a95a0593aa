//! IDA ETL - Loads the IDA spreadsheets into the `ida` star schema
//!
//! Stages, in run order:
//! - [`extract`]: workbook bytes -> table below a located header ([`header`])
//! - [`normalize`]: month columns unpivoted into content-hashed records
//! - [`dimensions`]: time, group, service and variable rows ensured
//! - [`loader`]: facts inserted in fixed-size atomic batches
//!
//! [`pipeline::Pipeline`] sequences them for every discovered resource and
//! produces a [`pipeline::RunSummary`].

pub mod config;
pub mod dimensions;
pub mod error;
pub mod extract;
pub mod header;
pub mod loader;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod warehouse;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{ConfigError, ExtractError, LoadError, PipelineError, ResourceError};
pub use model::{NormalizedRecord, RawGrid};
pub use pipeline::{Pipeline, PipelineSettings, RunSummary};
pub use source::ResourceSource;
pub use warehouse::{MemoryWarehouse, PgWarehouse, Warehouse};
