use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    CREATE_LIMIT_PER_DAY, CREATE_LIMIT_PER_MINUTE, DEFAULT_DATABASE_URL, DRAW_CHECK_INTERVAL,
    EDIT_TOKEN_TTL_SECS,
};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Tunables consumed by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Drafts per creator per trailing minute. Zero disables the check.
    pub create_limit_per_minute: u32,
    /// Drafts per creator per trailing day. Zero disables the check.
    pub create_limit_per_day: u32,
    pub edit_token_ttl: chrono::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_limit_per_minute: CREATE_LIMIT_PER_MINUTE,
            create_limit_per_day: CREATE_LIMIT_PER_DAY,
            edit_token_ttl: chrono::Duration::seconds(EDIT_TOKEN_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub draw_check_interval: Duration,
    pub retry: RetryPolicy,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset keys take their
    /// defaults; set but malformed keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RetryPolicy::default();
        let engine = EngineConfig::default();

        let draw_check_secs: u64 =
            parse_or(&lookup, "DRAW_CHECK_INTERVAL_SECS", DRAW_CHECK_INTERVAL.as_secs())?;
        if draw_check_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "DRAW_CHECK_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        let ttl_secs: i64 = parse_or(&lookup, "EDIT_TOKEN_TTL_SECS", EDIT_TOKEN_TTL_SECS)?;
        if ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                key: "EDIT_TOKEN_TTL_SECS",
                value: ttl_secs.to_string(),
            });
        }

        let base_ms: u64 = parse_or(
            &lookup,
            "DRAW_RETRY_BASE_MS",
            defaults.base_delay.as_millis() as u64,
        )?;

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            draw_check_interval: Duration::from_secs(draw_check_secs),
            retry: RetryPolicy {
                max_attempts: parse_or(&lookup, "DRAW_RETRY_ATTEMPTS", defaults.max_attempts)?,
                base_delay: Duration::from_millis(base_ms),
                multiplier: defaults.multiplier,
            },
            engine: EngineConfig {
                create_limit_per_minute: parse_or(
                    &lookup,
                    "CREATE_LIMIT_PER_MINUTE",
                    engine.create_limit_per_minute,
                )?,
                create_limit_per_day: parse_or(
                    &lookup,
                    "CREATE_LIMIT_PER_DAY",
                    engine.create_limit_per_day,
                )?,
                edit_token_ttl: chrono::Duration::seconds(ttl_secs),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.draw_check_interval, Duration::from_secs(60));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("DRAW_CHECK_INTERVAL_SECS", "5"),
            ("DRAW_RETRY_ATTEMPTS", "7"),
            ("DRAW_RETRY_BASE_MS", "50"),
            ("CREATE_LIMIT_PER_MINUTE", "0"),
            ("EDIT_TOKEN_TTL_SECS", "120"),
        ])
        .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.draw_check_interval, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.engine.create_limit_per_minute, 0);
        assert_eq!(config.engine.create_limit_per_day, CREATE_LIMIT_PER_DAY);
        assert_eq!(config.engine.edit_token_ttl, chrono::Duration::seconds(120));
    }

    #[test]
    fn rejects_malformed_values() {
        assert_eq!(
            config_from(&[("DRAW_RETRY_ATTEMPTS", "three")]),
            Err(ConfigError::Invalid {
                key: "DRAW_RETRY_ATTEMPTS",
                value: "three".into()
            })
        );
        assert!(config_from(&[("DRAW_CHECK_INTERVAL_SECS", "0")]).is_err());
        assert!(config_from(&[("EDIT_TOKEN_TTL_SECS", "-5")]).is_err());
    }
}
