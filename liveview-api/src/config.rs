//! Server configuration loaded from environment variables

use liveview_services::{BroadcastConfig, PriceFeedConfig};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct LiveviewConfig {
    /// Listening port (PORT)
    pub port: u16,
    /// Directory with the landing page and assets (STATIC_DIR)
    pub static_dir: PathBuf,
    /// Outbound buffer per connection (CONNECTION_BUFFER)
    pub connection_buffer: usize,
    pub broadcast: BroadcastConfig,
    pub database: DatabaseConfig,
    /// Present only when PRICE_FEED_ENABLED is set
    pub price_feed: Option<PriceFeedConfig>,
}

/// Where prices are stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Directory holding the database file (DATABASE_DIR)
    pub dir: PathBuf,
    /// Logical dataset, used as the file stem (DATABASE_NAME)
    pub name: String,
    /// Table holding price rows (DATABASE_TABLE)
    pub table: String,
}

impl DatabaseConfig {
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.db", self.name))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            name: "stockmarket".to_string(),
            table: "stocks".to_string(),
        }
    }
}

impl LiveviewConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = BroadcastConfig::default();
        let broadcast = BroadcastConfig {
            interval: millis(&lookup, "BROADCAST_INTERVAL_MS", defaults.interval)?,
            fetch_timeout: millis(&lookup, "FETCH_TIMEOUT_MS", defaults.fetch_timeout)?,
            push_timeout: millis(&lookup, "PUSH_TIMEOUT_MS", defaults.push_timeout)?,
        };

        let db_defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            dir: lookup("DATABASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(db_defaults.dir),
            name: non_empty(&lookup, "DATABASE_NAME", db_defaults.name)?,
            table: non_empty(&lookup, "DATABASE_TABLE", db_defaults.table)?,
        };

        let price_feed = if flag(&lookup, "PRICE_FEED_ENABLED", false)? {
            Some(price_feed(&lookup)?)
        } else {
            None
        };

        Ok(Self {
            port: parse(&lookup, "PORT", 3000)?,
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("client")),
            connection_buffer: positive(&lookup, "CONNECTION_BUFFER", 16)?,
            broadcast,
            database,
            price_feed,
        })
    }
}

fn price_feed<F>(lookup: &F) -> Result<PriceFeedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = PriceFeedConfig::default();

    let companies = match lookup("PRICE_FEED_COMPANIES") {
        Some(raw) => {
            let companies: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            if companies.is_empty() {
                return Err(ConfigError::invalid(
                    "PRICE_FEED_COMPANIES",
                    &raw,
                    "expected a comma-separated list of companies",
                ));
            }
            companies
        }
        None => defaults.companies,
    };

    Ok(PriceFeedConfig {
        companies,
        tick: millis(lookup, "PRICE_FEED_TICK_MS", defaults.tick)?,
        group_size: positive(lookup, "PRICE_FEED_GROUP_SIZE", defaults.group_size)?,
    })
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, &raw, e.to_string())),
        None => Ok(default),
    }
}

fn positive<F>(lookup: &F, key: &str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::invalid(key, "0", "must be greater than zero"));
    }
    Ok(value)
}

fn millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, key, default.as_millis() as u64)?;
    if value == 0 {
        return Err(ConfigError::invalid(key, "0", "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::invalid(key, &raw, "expected true or false")),
        },
        None => Ok(default),
    }
}

fn non_empty<F>(lookup: &F, key: &str, default: String) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if raw.trim().is_empty() => {
            Err(ConfigError::invalid(key, &raw, "must not be empty"))
        }
        Some(raw) => Ok(raw.trim().to_string()),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
