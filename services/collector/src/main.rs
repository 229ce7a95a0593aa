//! Collector binary - Lists IDA resources and optionally saves them locally
//!
//! Usage:
//!   # List the resources matching the target years/services:
//!   cargo run --bin ida-collector
//!
//!   # Download them to a directory:
//!   cargo run --bin ida-collector -- --out-dir ./data/raw --years 2018

use anyhow::{Context, Result};
use clap::Parser;
use ida_collector::config::parse_list;
use ida_collector::{CatalogClient, CatalogConfig};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ida-collector", about = "Lists and downloads IDA spreadsheets from dados.gov.br")]
struct Args {
    /// Directory to save downloaded spreadsheets into (list only when absent)
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Comma separated target years (overrides TARGET_YEARS)
    #[arg(long)]
    years: Option<String>,

    /// Comma separated service codes (overrides TARGET_SERVICES)
    #[arg(long)]
    services: Option<String>,
}

/// Save bytes under `dir` and return the path with its content digest.
async fn save_to_fs(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<(PathBuf, String)> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    fs::write(&path, bytes).await?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("sha256:{:x}", hasher.finalize());

    Ok((path, digest))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let _log_guard = tracing::subscriber::set_default(subscriber);

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

    let client = CatalogClient::new(config)?;
    let resources = client
        .discover()
        .await
        .context("catalog discovery failed")?;

    if resources.is_empty() {
        anyhow::bail!("No catalog resources match the target years/services");
    }

    println!("\nMatching resources:");
    println!("{:-<60}", "");
    for resource in &resources {
        println!(
            "  {} {} - {} [{}]",
            resource.service, resource.year, resource.title, resource.format
        );
    }
    println!("{:-<60}", "");

    let Some(out_dir) = args.out_dir else {
        return Ok(());
    };

    let mut saved = 0;
    let mut failed = 0;
    for resource in &resources {
        let result: Result<(PathBuf, String)> = async {
            let bytes = client.download(resource).await?;
            save_to_fs(&out_dir, &resource.file_name(), &bytes).await
        }
        .await;

        match result {
            Ok((path, digest)) => {
                info!(path = %path.display(), %digest, "saved");
                saved += 1;
            }
            Err(e) => {
                error!(title = %resource.title, error = %e, "download failed");
                failed += 1;
            }
        }
    }

    println!("\n=== Collection Summary ===");
    println!("Saved: {}", saved);
    println!("Failed: {}", failed);

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
