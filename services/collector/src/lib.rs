//! IDA Collector - Discovers and downloads IDA spreadsheets from the open data catalog
//!
//! Responsibilities:
//! - Query the dados.gov.br catalog for the IDA dataset resources
//! - Keep only resources whose title names a target year and service
//! - Download resource bytes into memory with bounded timeouts and retries
//!
//! The ETL service consumes this crate through [`CatalogClient`]; the
//! `ida-collector` binary exposes the same client for inspection.

pub mod catalog;
pub mod config;
pub mod error;

pub use catalog::{select_resources, CatalogClient, IdaResource, RawResource};
pub use config::CatalogConfig;
pub use error::CollectorError;
