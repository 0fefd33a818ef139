use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::TransitionPolicy;

pub const DEFAULT_DATABASE: &str = "homeserve.db";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_CURRENCY: &str = "INR";
pub const DEFAULT_LOG: &str = "info";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_path: String,
    pub bind: SocketAddr,
    pub default_currency: String,
    pub log_level: String,
    pub transition_policy: TransitionPolicy,
    pub busy_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE.to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            default_currency: DEFAULT_CURRENCY.to_string(),
            log_level: DEFAULT_LOG.to_string(),
            transition_policy: TransitionPolicy::default(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl AppConfig {
    /// Read `HOMESERVE_*` variables; call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_raw = lookup("HOMESERVE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "HOMESERVE_BIND",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let transition_policy = match lookup("HOMESERVE_TRANSITION_POLICY") {
            Some(raw) => TransitionPolicy::from_str(&raw).ok_or(ConfigError::Invalid {
                key: "HOMESERVE_TRANSITION_POLICY",
                value: raw,
                reason: "expected 'permissive' or 'strict'".to_string(),
            })?,
            None => TransitionPolicy::default(),
        };

        let busy_timeout_ms = match lookup("HOMESERVE_BUSY_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "HOMESERVE_BUSY_TIMEOUT_MS",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        let default_currency = lookup("HOMESERVE_CURRENCY")
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        if default_currency.len() != 3 || !default_currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                key: "HOMESERVE_CURRENCY",
                value: default_currency,
                reason: "expected a three-letter currency code".to_string(),
            });
        }

        Ok(Self {
            database_path: lookup("HOMESERVE_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            bind,
            default_currency,
            log_level: lookup("HOMESERVE_LOG").unwrap_or_else(|| DEFAULT_LOG.to_string()),
            transition_policy,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_path, DEFAULT_DATABASE);
        assert_eq!(config.default_currency, "INR");
        assert_eq!(config.transition_policy, TransitionPolicy::Permissive);
        assert_eq!(config.busy_timeout, Duration::from_millis(5_000));
        assert_eq!(config.bind.port(), 3000);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("HOMESERVE_DATABASE", "/tmp/market.db"),
            ("HOMESERVE_BIND", "0.0.0.0:8080"),
            ("HOMESERVE_CURRENCY", "usd"),
            ("HOMESERVE_TRANSITION_POLICY", "Strict"),
            ("HOMESERVE_BUSY_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, "/tmp/market.db");
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.transition_policy, TransitionPolicy::Strict);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AppConfig::from_lookup(lookup(&[("HOMESERVE_TRANSITION_POLICY", "loose")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("HOMESERVE_BIND", "nowhere")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("HOMESERVE_CURRENCY", "RUPEE")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("HOMESERVE_BUSY_TIMEOUT_MS", "-1")])).is_err());
    }
}
