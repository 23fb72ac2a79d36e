// Pipeline configuration
// Defaults match the on-disk layout; every field can be overridden from PROPERTY_* env vars

use crate::error::PipelineError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MIN_PRICE: f64 = 100_000.0;
pub const DEFAULT_MAX_PRICE: f64 = 10_000_000.0;
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Suburbs need this many priced-per-sqm sales to enter the value ranking
pub const DEFAULT_VALUE_MIN_GROUP: i64 = 10;

/// Suburbs need this many sales to enter the most-expensive ranking
pub const DEFAULT_EXPENSIVE_MIN_GROUP: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Directory holding the source CSV
    pub raw_data_dir: PathBuf,

    /// Directory receiving timestamped cleaned CSV snapshots
    pub processed_data_dir: PathBuf,

    /// Source CSV file name inside raw_data_dir
    pub raw_filename: String,

    /// Fallback log filter when RUST_LOG is unset
    pub log_level: String,

    /// Outlier bounds, both inclusive
    pub min_price: f64,
    pub max_price: f64,

    /// Rows per multi-row INSERT statement
    pub page_size: usize,

    pub value_min_group: i64,
    pub expensive_min_group: i64,

    /// Orchestrator retry policy
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("data/property_data.db"),
            raw_data_dir: PathBuf::from("data/raw"),
            processed_data_dir: PathBuf::from("data/processed"),
            raw_filename: "housing_data.csv".to_string(),
            log_level: "info".to_string(),
            min_price: DEFAULT_MIN_PRICE,
            max_price: DEFAULT_MAX_PRICE,
            page_size: DEFAULT_PAGE_SIZE,
            value_min_group: DEFAULT_VALUE_MIN_GROUP,
            expensive_min_group: DEFAULT_EXPENSIVE_MIN_GROUP,
            retries: 1,
            retry_delay_secs: 300,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and apply environment overrides on top of defaults
    pub fn from_env() -> Result<Self> {
        match dotenv::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(_) => debug!("No .env file found, using process environment"),
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (env vars in production, maps in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("PROPERTY_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROPERTY_RAW_DATA_DIR") {
            config.raw_data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROPERTY_PROCESSED_DATA_DIR") {
            config.processed_data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROPERTY_RAW_FILENAME") {
            config.raw_filename = v;
        }
        if let Some(v) = lookup("PROPERTY_LOG_LEVEL") {
            config.log_level = v;
        }

        parse_override(&lookup, "PROPERTY_MIN_PRICE", &mut config.min_price)?;
        parse_override(&lookup, "PROPERTY_MAX_PRICE", &mut config.max_price)?;
        parse_override(&lookup, "PROPERTY_PAGE_SIZE", &mut config.page_size)?;
        parse_override(&lookup, "PROPERTY_VALUE_MIN_GROUP", &mut config.value_min_group)?;
        parse_override(&lookup, "PROPERTY_EXPENSIVE_MIN_GROUP", &mut config.expensive_min_group)?;
        parse_override(&lookup, "PROPERTY_RETRIES", &mut config.retries)?;
        parse_override(&lookup, "PROPERTY_RETRY_DELAY_SECS", &mut config.retry_delay_secs)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_price.is_finite() && self.max_price.is_finite()) || self.min_price > self.max_price {
            return Err(PipelineError::Config(format!(
                "invalid outlier bounds: {} - {}",
                self.min_price, self.max_price
            ))
            .into());
        }
        if self.page_size == 0 {
            return Err(PipelineError::Config("page size must be at least 1".to_string()).into());
        }
        Ok(())
    }

    pub fn raw_data_path(&self) -> PathBuf {
        self.raw_data_dir.join(&self.raw_filename)
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_data_dir
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn parse_override<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse::<T>().map_err(|_| {
            PipelineError::Config(format!("{} has invalid value '{}'", key, raw))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.min_price, 100_000.0);
        assert_eq!(config.max_price, 10_000_000.0);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.value_min_group, 10);
        assert_eq!(config.expensive_min_group, 5);
        assert_eq!(config.raw_data_path(), PathBuf::from("data/raw/housing_data.csv"));
        assert_eq!(config.retry_delay(), Duration::from_secs(300));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("PROPERTY_DB_PATH", "/tmp/test.db"),
            ("PROPERTY_PAGE_SIZE", "250"),
            ("PROPERTY_EXPENSIVE_MIN_GROUP", "3"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/test.db"));
        assert_eq!(config.page_size, 250);
        assert_eq!(config.expensive_min_group, 3);
        assert_eq!(config.value_min_group, 10);
    }

    #[test]
    fn test_malformed_override_is_config_error() {
        let err = Config::from_lookup(lookup_from(&[("PROPERTY_MIN_PRICE", "cheap")])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            ("PROPERTY_MIN_PRICE", "500000"),
            ("PROPERTY_MAX_PRICE", "100"),
        ]));
        assert!(result.is_err());
    }
}
