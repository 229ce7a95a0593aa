//! Schema provisioning for the `ida` star schema.

use sqlx::PgPool;
use tracing::info;

use crate::error::LoadError;
use crate::warehouse::{REQUIRED_TABLES, SCHEMA};

/// Idempotent DDL; never drops anything.
pub const SCHEMA_SQL: &str = include_str!("../sql/schema_star.sql");

pub async fn init_schema(pool: &PgPool) -> Result<(), LoadError> {
    info!(schema = SCHEMA, "applying schema script");
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    info!(tables = REQUIRED_TABLES.len(), "schema ready");
    Ok(())
}
