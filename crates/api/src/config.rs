//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use coachgen_infra::{CacheConfig, OrchestratorConfig, RetryPolicy};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres queue store when set; in-memory otherwise.
    pub database_url: Option<String>,
    pub background_execution: bool,
    pub ceiling: Duration,
    pub max_attempts: u32,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub poll_interval: Duration,
    /// Duration of the bundled simulated generator.
    pub simulated_generation: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            background_execution: true,
            ceiling: Duration::from_secs(300),
            max_attempts: 3,
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(900),
            poll_interval: Duration::from_millis(1000),
            simulated_generation: Duration::from_secs(20),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", defaults.bind_addr)?,
            database_url: get("DATABASE_URL"),
            background_execution: match get("BACKGROUND_EXECUTION") {
                Some(raw) => parse_bool(&raw)
                    .with_context(|| format!("BACKGROUND_EXECUTION={raw:?}"))?,
                None => defaults.background_execution,
            },
            ceiling: secs_or(&get, "GENERATION_CEILING_SECS", defaults.ceiling)?,
            max_attempts: parse_or(&get, "GENERATION_MAX_ATTEMPTS", defaults.max_attempts)?,
            cache_capacity: parse_or(&get, "RECONNECT_CACHE_CAPACITY", defaults.cache_capacity)?,
            cache_ttl: secs_or(&get, "RECONNECT_CACHE_TTL_SECS", defaults.cache_ttl)?,
            poll_interval: Duration::from_millis(parse_or(
                &get,
                "STREAM_POLL_MILLIS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            simulated_generation: secs_or(
                &get,
                "SIMULATED_GENERATION_SECS",
                defaults.simulated_generation,
            )?,
        })
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        };
        OrchestratorConfig::default()
            .with_ceiling(self.ceiling)
            .with_retry(retry)
            .with_poll_interval(self.poll_interval)
            .with_cache(CacheConfig {
                capacity: self.cache_capacity,
                ttl: self.cache_ttl,
            })
            .with_background(self.background_execution)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key}={raw:?}")),
        None => Ok(default),
    }
}

fn secs_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected a boolean"),
    }
}
