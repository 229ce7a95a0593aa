//! ETL binary - Discovers, extracts, normalizes and loads the IDA spreadsheets
//!
//! Usage:
//!   # Load the default years/services into Postgres (DB_URL):
//!   cargo run --bin ida-etl
//!
//!   # Create the ida schema first, then load 2019 SMP only:
//!   cargo run --bin ida-etl -- --init-schema --years 2019 --services SMP
//!
//!   # Run everything against an in-memory store:
//!   cargo run --bin ida-etl -- --dry-run --summary-json
//!
//! Exit status: 0 clean run, 1 some resources failed, 2 fatal error.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ida_collector::config::parse_list;
use ida_collector::{CatalogClient, CatalogConfig};
use ida_etl::{logging, schema};
use ida_etl::{Config, MemoryWarehouse, PgWarehouse, Pipeline, PipelineError, RunSummary, Warehouse};
use tracing::{error, info, warn};

const EXIT_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "ida-etl", about = "Loads IDA spreadsheets into the ida star schema")]
struct Args {
    /// Records per insert transaction (overrides BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Comma separated target years (overrides TARGET_YEARS)
    #[arg(long)]
    years: Option<String>,

    /// Comma separated service codes (overrides TARGET_SERVICES)
    #[arg(long)]
    services: Option<String>,

    /// Load into an in-memory store instead of Postgres
    #[arg(long)]
    dry_run: bool,

    /// Apply the idempotent schema script before loading
    #[arg(long)]
    init_schema: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    summary_json: bool,
}

fn catalog_config(args: &Args) -> Result<CatalogConfig> {
    let mut config = CatalogConfig::from_env().context("invalid catalog configuration")?;
    if let Some(years) = &args.years {
        config.target_years = parse_list("--years", years)?;
    }
    if let Some(services) = &args.services {
        config.target_services = parse_list::<String>("--services", services)?
            .into_iter()
            .map(|s| s.to_uppercase())
            .collect();
    }
    Ok(config)
}

fn print_summary(summary: &RunSummary, as_json: bool) {
    if as_json {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "failed to serialize summary"),
        }
    } else {
        println!("\n{summary}");
    }
}

async fn run_pipeline(
    warehouse: &dyn Warehouse,
    client: &CatalogClient,
    config: &Config,
) -> Result<RunSummary, PipelineError> {
    Pipeline::new(warehouse, client, config.pipeline_settings())
        .run()
        .await
}

async fn run(args: &Args, config: &Config) -> Result<RunSummary> {
    let client = CatalogClient::new(catalog_config(args)?)?;

    if args.dry_run {
        if args.init_schema {
            warn!("--init-schema ignored in dry-run mode");
        }
        let warehouse = MemoryWarehouse::new();
        let summary = run_pipeline(&warehouse, &client, config).await?;
        let facts = warehouse.fact_count().await?;
        info!(facts, "dry run finished, nothing written to the database");
        return Ok(summary);
    }

    let pool = config.pool_settings()?;
    let warehouse = PgWarehouse::connect(&pool)
        .await
        .context("Failed to connect to database")?;

    // The pool is released on every path out of here.
    let result: Result<RunSummary> = async {
        if args.init_schema {
            schema::init_schema(warehouse.pool())
                .await
                .context("schema initialization failed")?;
        }
        Ok(run_pipeline(&warehouse, &client, config).await?)
    }
    .await;
    warehouse.close().await;
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::from(EXIT_FATAL);
    }

    let _log_guard = tracing::subscriber::set_default(logging::subscriber(&config.log_level));

    println!("=== IDA ETL ===");
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });
    println!("Batch size: {}", config.batch_size);

    match run(&args, &config).await {
        Ok(summary) => {
            print_summary(&summary, args.summary_json);
            if summary.load_anomaly() {
                eprintln!("Warning: records were transformed but none were loaded");
            }
            ExitCode::from(summary.exit_code())
        }
        Err(e) => {
            if let Some(PipelineError::FinalFlush { summary, .. }) = e.downcast_ref::<PipelineError>() {
                print_summary(summary, args.summary_json);
            }
            error!(error = %format!("{e:#}"), "run aborted");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
