//! Loader configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::loader::DEFAULT_BATCH_SIZE;
use crate::pipeline::{PipelineSettings, DEFAULT_FLUSH_MULTIPLIER};
use crate::warehouse::PoolSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Required for anything that touches Postgres.
    pub db_url: Option<String>,
    pub batch_size: usize,
    pub flush_multiplier: usize,
    pub pool_min: u32,
    pub pool_max: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: None,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_multiplier: DEFAULT_FLUSH_MULTIPLIER,
            pool_min: 1,
            pool_max: 5,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            db_url: get("DB_URL"),
            batch_size: parse_or(get("BATCH_SIZE"), "BATCH_SIZE", defaults.batch_size)?,
            flush_multiplier: parse_or(
                get("FLUSH_MULTIPLIER"),
                "FLUSH_MULTIPLIER",
                defaults.flush_multiplier,
            )?,
            pool_min: parse_or(get("DB_POOL_MIN"), "DB_POOL_MIN", defaults.pool_min)?,
            pool_max: parse_or(get("DB_POOL_MAX"), "DB_POOL_MAX", defaults.pool_max)?,
            acquire_timeout: parse_or(
                get("DB_ACQUIRE_TIMEOUT_SECS"),
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )
            .map(Duration::from_secs)?,
            statement_timeout: parse_or(
                get("DB_STATEMENT_TIMEOUT_SECS"),
                "DB_STATEMENT_TIMEOUT_SECS",
                defaults.statement_timeout.as_secs(),
            )
            .map(Duration::from_secs)?,
            log_level: get("LOG_LEVEL")
                .map(|v| v.trim().to_lowercase())
                .unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::OutOfRange("BATCH_SIZE must be at least 1".to_string()));
        }
        if self.flush_multiplier == 0 {
            return Err(ConfigError::OutOfRange(
                "FLUSH_MULTIPLIER must be at least 1".to_string(),
            ));
        }
        if self.pool_max == 0 || self.pool_min > self.pool_max {
            return Err(ConfigError::OutOfRange(format!(
                "pool bounds {}..{} are invalid",
                self.pool_min, self.pool_max
            )));
        }
        Ok(())
    }

    pub fn pool_settings(&self) -> Result<PoolSettings, ConfigError> {
        let url = self.db_url.clone().ok_or(ConfigError::Missing("DB_URL"))?;
        Ok(PoolSettings {
            url,
            min_connections: self.pool_min,
            max_connections: self.pool_max,
            acquire_timeout: self.acquire_timeout,
            statement_timeout: self.statement_timeout,
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            batch_size: self.batch_size,
            flush_multiplier: self.flush_multiplier,
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
