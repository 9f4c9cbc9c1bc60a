use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context};

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_address: String,
    pub db_pool_size: u32,
    pub lock_timeout_ms: u64,
    pub hold_duration_minutes: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: i64,
    pub notify_url: Option<String>,
    pub log_level: tracing::Level,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            bind_address: "127.0.0.1:8080".to_string(),
            db_pool_size: 10,
            lock_timeout_ms: 5000,
            hold_duration_minutes: 15,
            sweep_interval_secs: 60,
            sweep_batch_size: 100,
            notify_url: None,
            log_level: tracing::Level::INFO,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {name} {raw:?}: {e}")),
        None => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Settings::default();
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let settings = Settings {
            database_url,
            bind_address: lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            db_pool_size: parse_var(&lookup, "DB_POOL_SIZE", defaults.db_pool_size)?,
            lock_timeout_ms: parse_var(&lookup, "LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
            hold_duration_minutes: parse_var(&lookup, "HOLD_DURATION_MINUTES", defaults.hold_duration_minutes)?,
            sweep_interval_secs: parse_var(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            sweep_batch_size: parse_var(&lookup, "SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?,
            notify_url: lookup("NOTIFY_URL"),
            log_level: parse_var(&lookup, "LOG_LEVEL", defaults.log_level)?,
        };

        if settings.db_pool_size == 0 {
            return Err(anyhow!("DB_POOL_SIZE must be positive"));
        }
        if settings.hold_duration_minutes <= 0 {
            return Err(anyhow!("HOLD_DURATION_MINUTES must be positive"));
        }
        if settings.sweep_interval_secs == 0 {
            return Err(anyhow!("SWEEP_INTERVAL_SECS must be positive"));
        }
        if settings.sweep_batch_size <= 0 {
            return Err(anyhow!("SWEEP_BATCH_SIZE must be positive"));
        }
        Ok(settings)
    }

    pub fn default_hold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.hold_duration_minutes)
    }
}
