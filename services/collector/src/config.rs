//! Catalog configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::CollectorError;

pub const DEFAULT_BASE_URL: &str = "https://dados.gov.br/dados/api/publico";
pub const DEFAULT_DATASET_ID: &str = "63a9c9f6-9991-48b4-a072-ce22765652e6";
pub const DEFAULT_TARGET_YEARS: &[i32] = &[2017, 2018, 2019];
pub const DEFAULT_TARGET_SERVICES: &[&str] = &["SMP", "STFC", "SCM"];

/// Where to find the IDA dataset and which of its resources to take.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub dataset_id: String,
    /// Sent as `chave-api-dados-abertos` when present.
    pub api_key: Option<String>,
    pub target_years: Vec<i32>,
    pub target_services: Vec<String>,
    pub discovery_timeout: Duration,
    pub download_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            dataset_id: DEFAULT_DATASET_ID.to_string(),
            api_key: None,
            target_years: DEFAULT_TARGET_YEARS.to_vec(),
            target_services: DEFAULT_TARGET_SERVICES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            discovery_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            user_agent: "ida-collector/0.1 (carga do data mart IDA)".to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn from_env() -> Result<Self, CollectorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults,
    /// set-but-invalid keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CollectorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            base_url: get("CATALOG_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            dataset_id: get("CATALOG_DATASET_ID").unwrap_or(defaults.dataset_id),
            api_key: get("DADOS_GOV_API_KEY"),
            target_years: match get("TARGET_YEARS") {
                Some(raw) => parse_list("TARGET_YEARS", &raw)?,
                None => defaults.target_years,
            },
            target_services: match get("TARGET_SERVICES") {
                Some(raw) => parse_list::<String>("TARGET_SERVICES", &raw)?
                    .into_iter()
                    .map(|s| s.to_uppercase())
                    .collect(),
                None => defaults.target_services,
            },
            discovery_timeout: secs(get("DISCOVERY_TIMEOUT_SECS"), "DISCOVERY_TIMEOUT_SECS")?
                .unwrap_or(defaults.discovery_timeout),
            download_timeout: secs(get("DOWNLOAD_TIMEOUT_SECS"), "DOWNLOAD_TIMEOUT_SECS")?
                .unwrap_or(defaults.download_timeout),
            max_retries: match get("DOWNLOAD_MAX_RETRIES") {
                Some(raw) => parse_one("DOWNLOAD_MAX_RETRIES", &raw)?,
                None => defaults.max_retries,
            },
            retry_backoff: defaults.retry_backoff,
            user_agent: defaults.user_agent,
        })
    }
}

/// Parse a comma separated list, ignoring blank items.
pub fn parse_list<T: FromStr>(key: &str, raw: &str) -> Result<Vec<T>, CollectorError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_one(key, item))
        .collect()
}

fn parse_one<T: FromStr>(key: &str, raw: &str) -> Result<T, CollectorError> {
    raw.trim()
        .parse()
        .map_err(|_| CollectorError::Config(format!("{key}: cannot parse '{raw}'")))
}

fn secs(raw: Option<String>, key: &str) -> Result<Option<Duration>, CollectorError> {
    raw.map(|v| parse_one::<u64>(key, &v).map(Duration::from_secs))
        .transpose()
}
