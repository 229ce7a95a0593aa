use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use super::{BatchOutcome, Warehouse};
use crate::dimensions::DimensionRows;
use crate::error::LoadError;
use crate::model::NormalizedRecord;

pub const SCHEMA: &str = "ida";

/// Tables the preflight check probes, dimensions first.
pub const REQUIRED_TABLES: [&str; 5] = [
    "dim_tempo",
    "dim_grupo_economico",
    "dim_servico",
    "dim_variavel",
    "fact_ida",
];

const INSERT_TIME: &str = r#"
    INSERT INTO ida.dim_tempo (ano_mes, ano, mes, mes_nome, trimestre, semestre)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (ano_mes) DO NOTHING
"#;

const INSERT_GROUP: &str = r#"
    INSERT INTO ida.dim_grupo_economico (grupo_codigo, grupo_nome, grupo_normalizado)
    VALUES ($1, $2, $1)
    ON CONFLICT (grupo_codigo) DO NOTHING
"#;

const INSERT_SERVICE: &str = r#"
    INSERT INTO ida.dim_servico (servico_codigo, servico_nome, servico_descricao)
    VALUES ($1, $2, $2)
    ON CONFLICT (servico_codigo) DO NOTHING
"#;

const INSERT_VARIABLE: &str = r#"
    INSERT INTO ida.dim_variavel (variavel_codigo, variavel_nome)
    VALUES ($1, $2)
    ON CONFLICT (variavel_codigo) DO NOTHING
"#;

// Surrogate keys are resolved by joining on the natural keys; a missing
// dimension row makes the SELECT empty and the insert a no-op.
const INSERT_FACT: &str = r#"
    INSERT INTO ida.fact_ida (
        tempo_key, grupo_key, servico_key, variavel_key,
        valor, arquivo_origem, linha_origem, hash_registro
    )
    SELECT t.tempo_key, g.grupo_key, s.servico_key, v.variavel_key,
           CAST($5 AS NUMERIC), $6, $7, $8
    FROM ida.dim_tempo t, ida.dim_grupo_economico g, ida.dim_servico s, ida.dim_variavel v
    WHERE t.ano_mes = $1
      AND g.grupo_codigo = $2
      AND s.servico_codigo = $3
      AND v.variavel_codigo = $4
    ON CONFLICT (hash_registro) DO NOTHING
"#;

const HASH_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM ida.fact_ida WHERE hash_registro = $1)";

/// Connection pool parameters.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

/// The production warehouse: schema `ida` in Postgres.
pub struct PgWarehouse {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgWarehouse {
    pub async fn connect(settings: &PoolSettings) -> Result<Self, LoadError> {
        let pool = PgPoolOptions::new()
            .min_connections(settings.min_connections)
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.url)
            .await?;

        info!(
            min = settings.min_connections,
            max = settings.max_connections,
            "database pool ready"
        );
        Ok(Self::from_pool(pool, settings.statement_timeout))
    }

    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Start a transaction bounded by the configured statement timeout.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LoadError> {
        let mut tx = self.pool.begin().await?;
        let set_timeout = statement_timeout_sql(self.statement_timeout);
        sqlx::query(&set_timeout).execute(&mut *tx).await?;
        Ok(tx)
    }
}

/// `SET LOCAL` takes no bind parameters, so the value is rendered inline.
fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", timeout.as_millis())
}

fn as_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl Warehouse for PgWarehouse {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn check_ready(&self) -> Result<(), LoadError> {
        let schema: Option<(String,)> = sqlx::query_as(
            "SELECT schema_name::text FROM information_schema.schemata WHERE schema_name = $1",
        )
        .bind(SCHEMA)
        .fetch_optional(&self.pool)
        .await?;

        if schema.is_none() {
            return Err(LoadError::NotReady(format!("schema '{SCHEMA}' not found")));
        }

        for table in REQUIRED_TABLES {
            let probe = format!("SELECT 1 FROM {SCHEMA}.{table} LIMIT 1");
            sqlx::query(&probe)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| LoadError::NotReady(format!("table {SCHEMA}.{table}: {e}")))?;
        }

        info!("database health check passed");
        Ok(())
    }

    #[instrument(skip_all, fields(rows = rows.len()))]
    async fn ensure_dimensions(&self, rows: &DimensionRows) -> Result<u64, LoadError> {
        let mut tx = self.begin().await?;
        let mut created = 0;

        for time in &rows.times {
            created += sqlx::query(INSERT_TIME)
                .bind(time.period)
                .bind(time.year)
                .bind(as_i32(time.month))
                .bind(time.month_name)
                .bind(as_i32(time.quarter))
                .bind(as_i32(time.half))
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        for (sql, entries) in [
            (INSERT_GROUP, &rows.groups),
            (INSERT_SERVICE, &rows.services),
            (INSERT_VARIABLE, &rows.variables),
        ] {
            for entry in entries {
                created += sqlx::query(sql)
                    .bind(&entry.code)
                    .bind(&entry.name)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    #[instrument(skip_all, fields(records = batch.len()))]
    async fn insert_fact_batch(&self, batch: &[NormalizedRecord]) -> Result<BatchOutcome, LoadError> {
        let mut tx = self.begin().await?;
        let mut outcome = BatchOutcome::default();

        for record in batch {
            let affected = sqlx::query(INSERT_FACT)
                .bind(record.period)
                .bind(&record.economic_group)
                .bind(&record.service)
                .bind(&record.variable)
                .bind(record.value)
                .bind(&record.source_file)
                .bind(as_i32(record.source_row))
                .bind(&record.content_hash)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if affected > 0 {
                outcome.inserted += affected;
                continue;
            }

            let (exists,): (bool,) = sqlx::query_as(HASH_EXISTS)
                .bind(&record.content_hash)
                .fetch_one(&mut *tx)
                .await?;

            if exists {
                outcome.duplicates += 1;
            } else {
                outcome.unresolved += 1;
                warn!(
                    period = %record.period,
                    group = %record.economic_group,
                    service = %record.service,
                    variable = %record.variable,
                    file = %record.source_file,
                    row = record.source_row,
                    "fact skipped: no matching dimension row"
                );
            }
        }

        tx.commit().await?;
        debug!(?outcome, "batch committed");
        Ok(outcome)
    }

    async fn fact_count(&self) -> Result<u64, LoadError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ida.fact_ida")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!("database pool closed");
        }
    }
}
