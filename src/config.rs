//! Gateway configuration from environment variables.

use crate::error::ConfigError;
use regex::Regex;
use std::time::Duration;

/// Runtime settings for the gateway. Built once at startup; invalid values
/// abort the process with exit code 2.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Connection target (DATABASE_URL).
    pub database_url: String,
    /// Namespaces exposed through the API.
    pub schemas: Vec<String>,
    /// Object names matching any of these patterns are not mounted.
    pub excluded: Vec<Regex>,
    pub pool_min: u32,
    pub pool_max: u32,
    pub pool_max_lifetime: Duration,
    pub pool_acquire_timeout: Duration,
    pub default_limit: i64,
    pub max_limit: i64,
    pub debounce: Duration,
    pub heartbeat: Duration,
    pub reconcile: Duration,
    pub request_timeout: Duration,
    pub bind: String,
    /// "text" or "json" log output.
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let schemas = std::env::var("PGHATCH_SCHEMAS")
            .unwrap_or_else(|_| "public".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if schemas.is_empty() {
            return Err(ConfigError::Invalid {
                name: "PGHATCH_SCHEMAS",
                value: String::new(),
            });
        }

        let excluded = match std::env::var("PGHATCH_EXCLUDE") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|p| {
                    Regex::new(p).map_err(|source| ConfigError::Pattern {
                        pattern: p.to_string(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => Vec::new(),
        };

        let log_format = match std::env::var("PGHATCH_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(ConfigError::Invalid {
                    name: "PGHATCH_LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(GatewayConfig {
            database_url,
            schemas,
            excluded,
            pool_min: env_parse("PGHATCH_POOL_MIN", 0)?,
            pool_max: env_parse("PGHATCH_POOL_MAX", 10)?,
            pool_max_lifetime: Duration::from_secs(env_parse(
                "PGHATCH_POOL_MAX_LIFETIME_S",
                1800u64,
            )?),
            pool_acquire_timeout: Duration::from_secs(env_parse(
                "PGHATCH_POOL_ACQUIRE_TIMEOUT_S",
                5u64,
            )?),
            default_limit: env_parse("PGHATCH_DEFAULT_LIMIT", 100i64)?,
            max_limit: env_parse("PGHATCH_MAX_LIMIT", 10_000i64)?,
            debounce: Duration::from_millis(env_parse("PGHATCH_DEBOUNCE_MS", 250u64)?),
            heartbeat: Duration::from_secs(env_parse("PGHATCH_HEARTBEAT_S", 30u64)?),
            reconcile: Duration::from_secs(env_parse("PGHATCH_RECONCILE_S", 60u64)?),
            request_timeout: Duration::from_secs(env_parse("PGHATCH_REQUEST_TIMEOUT_S", 30u64)?),
            bind: std::env::var("PGHATCH_BIND").unwrap_or_else(|_| "0.0.0.0:8000".into()),
            log_format,
        })
    }

    /// True when an object name is excluded from endpoint generation.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|re| re.is_match(name))
    }

    /// Config for tests: localhost defaults, no exclusions.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        GatewayConfig {
            database_url: "postgres://localhost/postgres".into(),
            schemas: vec!["public".into()],
            excluded: Vec::new(),
            pool_min: 0,
            pool_max: 5,
            pool_max_lifetime: Duration::from_secs(1800),
            pool_acquire_timeout: Duration::from_secs(5),
            default_limit: 100,
            max_limit: 10_000,
            debounce: Duration::from_millis(250),
            heartbeat: Duration::from_secs(30),
            reconcile: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            bind: "127.0.0.1:0".into(),
            log_format: LogFormat::Text,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}
