// src/config.rs
use log::{info, warn};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub rate_limit_backoff: Duration,
    pub daily_limit: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        ImportSettings {
            batch_size: 8,
            batch_delay: Duration::from_secs(60),
            rate_limit_backoff: Duration::from_secs(60),
            daily_limit: 800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub scylla_node: Option<String>,
    pub api_key: Option<String>,
    pub jwt_secret: Option<String>,
    pub import: ImportSettings,
    pub refresh_interval: Option<Duration>,
}

impl Config {
    /// Reads the environment, after loading `.env` if one exists.
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded variables from .env");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ImportSettings::default();
        let batch_size: usize = parse_or(&lookup, "IMPORT_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "IMPORT_BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            addr: parse_or(&lookup, "FORUM_ADDR", SocketAddr::from(([127, 0, 0, 1], 3030)))?,
            scylla_node: non_empty(&lookup, "SCYLLA_NODE"),
            api_key: non_empty(&lookup, "TWELVE_DATA_API_KEY"),
            jwt_secret: non_empty(&lookup, "JWT_SECRET"),
            import: ImportSettings {
                batch_size,
                batch_delay: Duration::from_secs(parse_or(
                    &lookup,
                    "IMPORT_BATCH_DELAY_SECS",
                    defaults.batch_delay.as_secs(),
                )?),
                rate_limit_backoff: Duration::from_secs(parse_or(
                    &lookup,
                    "RATE_LIMIT_BACKOFF_SECS",
                    defaults.rate_limit_backoff.as_secs(),
                )?),
                daily_limit: parse_or(&lookup, "DAILY_REQUEST_LIMIT", defaults.daily_limit)?,
            },
            refresh_interval: non_empty(&lookup, "PRICE_REFRESH_INTERVAL_SECS")
                .map(|raw| parse("PRICE_REFRESH_INTERVAL_SECS", &raw))
                .transpose()?
                .map(Duration::from_secs),
        })
    }

    pub fn scylla_node(&self) -> Result<&str, ConfigError> {
        self.scylla_node
            .as_deref()
            .ok_or(ConfigError::Missing("SCYLLA_NODE"))
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::Missing("TWELVE_DATA_API_KEY"))
    }

    pub fn jwt_secret(&self) -> Result<&str, ConfigError> {
        self.jwt_secret
            .as_deref()
            .ok_or(ConfigError::Missing("JWT_SECRET"))
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {} value: {}", key, e);
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match non_empty(lookup, key) {
        Some(raw) => parse(key, &raw),
        None => {
            info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_follow_twelve_data_free_tier() {
        let config = config(&[]).unwrap();
        assert_eq!(config.addr, "127.0.0.1:3030".parse().unwrap());
        assert_eq!(config.import, ImportSettings::default());
        assert_eq!(config.import.batch_size, 8);
        assert!(config.refresh_interval.is_none());
        assert!(matches!(config.api_key(), Err(ConfigError::Missing("TWELVE_DATA_API_KEY"))));
        assert!(config.scylla_node().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("FORUM_ADDR", "0.0.0.0:8080"),
            ("SCYLLA_NODE", "db:9042"),
            ("IMPORT_BATCH_SIZE", "2"),
            ("IMPORT_BATCH_DELAY_SECS", "5"),
            ("PRICE_REFRESH_INTERVAL_SECS", "3600"),
            ("JWT_SECRET", "  s3cret "),
        ])
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.scylla_node().unwrap(), "db:9042");
        assert_eq!(config.import.batch_size, 2);
        assert_eq!(config.import.batch_delay, Duration::from_secs(5));
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(3600)));
        assert_eq!(config.jwt_secret().unwrap(), "s3cret");
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(matches!(
            config(&[("IMPORT_BATCH_SIZE", "eight")]),
            Err(ConfigError::Invalid { key: "IMPORT_BATCH_SIZE", .. })
        ));
        assert!(config(&[("IMPORT_BATCH_SIZE", "0")]).is_err());
    }
}
