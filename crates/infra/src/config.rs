//! Environment-driven configuration for the offer pipeline.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use projectdesk_observability::LogFormat;

use crate::jobs::{EnqueueOptions, InvalidEnqueueOptions, JobExecutorConfig, RetryPolicy, MAX_SCHEDULE_OFFSET};

const DEFAULT_OFFER_OPTIONS: EnqueueOptions = match EnqueueOptions::new(Duration::from_millis(1000), 3) {
    Ok(options) => options,
    Err(_) => panic!("default offer options are invalid"),
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Postgres URL when persistent stores are enabled.
    pub database_url: Option<String>,
    pub artifact_root: PathBuf,
    /// Delay and attempt budget for every offer job; validated at load.
    pub offer: EnqueueOptions,
    pub poll_interval: Duration,
    pub lease_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub currency_symbol: String,
    pub bind_addr: String,
    pub log_format: LogFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            artifact_root: PathBuf::from("public"),
            offer: DEFAULT_OFFER_OPTIONS,
            poll_interval: Duration::from_millis(250),
            lease_timeout: Duration::from_secs(300),
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(60),
            currency_symbol: "€".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset variables take their defaults;
    /// set-but-invalid ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let use_persistent: bool = parse(&lookup, "USE_PERSISTENT_STORES")?.unwrap_or(false);
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if use_persistent && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        // Every duration ends up offsetting a job timestamp, so all share one ceiling.
        let bounded = |name: &'static str, value: Option<Duration>, default: Duration| match value {
            Some(d) if d > MAX_SCHEDULE_OFFSET => Err(invalid(
                name,
                &format!("{d:?}"),
                format!("must not exceed {MAX_SCHEDULE_OFFSET:?}"),
            )),
            Some(d) => Ok(d),
            None => Ok(default),
        };
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            bounded(name, parse::<u64>(&lookup, name)?.map(Duration::from_millis), default)
        };

        let offer_max_attempts = parse(&lookup, "OFFER_MAX_ATTEMPTS")?.unwrap_or(defaults.offer.max_attempts());
        let offer_delay = millis("OFFER_DELAY_MS", defaults.offer.delay())?;
        let offer = EnqueueOptions::new(offer_delay, offer_max_attempts).map_err(|e| match e {
            InvalidEnqueueOptions::NoAttempts => invalid("OFFER_MAX_ATTEMPTS", "0", e.to_string()),
            InvalidEnqueueOptions::DelayTooLong(d) => invalid("OFFER_DELAY_MS", &format!("{d:?}"), e.to_string()),
        })?;

        let config = Self {
            database_url: if use_persistent { database_url } else { None },
            artifact_root: lookup("ARTIFACT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_root),
            offer,
            poll_interval: millis("JOB_POLL_INTERVAL_MS", defaults.poll_interval)?,
            lease_timeout: bounded(
                "JOB_LEASE_TIMEOUT_SECS",
                parse::<u64>(&lookup, "JOB_LEASE_TIMEOUT_SECS")?.map(Duration::from_secs),
                defaults.lease_timeout,
            )?,
            retry_base_delay: millis("RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?,
            retry_max_delay: millis("RETRY_MAX_DELAY_MS", defaults.retry_max_delay)?,
            currency_symbol: lookup("OFFER_CURRENCY_SYMBOL").unwrap_or(defaults.currency_symbol),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            log_format: parse(&lookup, "LOG_FORMAT")?.unwrap_or_default(),
        };

        if config.poll_interval.is_zero() {
            return Err(invalid("JOB_POLL_INTERVAL_MS", "0", "must be positive"));
        }
        if config.lease_timeout.is_zero() {
            return Err(invalid("JOB_LEASE_TIMEOUT_SECS", "0", "must be positive"));
        }

        Ok(config)
    }

    pub fn use_persistent_stores(&self) -> bool {
        self.database_url.is_some()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.offer.max_attempts(), self.retry_base_delay, self.retry_max_delay)
    }

    pub fn executor_config(&self) -> JobExecutorConfig {
        JobExecutorConfig::default()
            .with_name("offer-worker")
            .with_poll_interval(self.poll_interval)
            .with_lease_timeout(self.lease_timeout)
    }
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(name, &raw, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = from(&[]).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(!config.use_persistent_stores());
        assert_eq!(config.offer.max_attempts(), 3);
        assert_eq!(config.offer.delay(), Duration::from_secs(1));
    }

    #[test]
    fn reads_overrides() {
        let config = from(&[
            ("OFFER_MAX_ATTEMPTS", "5"),
            ("OFFER_DELAY_MS", "0"),
            ("JOB_LEASE_TIMEOUT_SECS", "30"),
            ("ARTIFACT_ROOT", "/var/lib/offers"),
            ("LOG_FORMAT", "pretty"),
            ("OFFER_CURRENCY_SYMBOL", "$"),
        ])
        .unwrap();

        assert_eq!(config.offer.max_attempts(), 5);
        assert_eq!(config.offer.delay(), Duration::ZERO);
        assert_eq!(config.lease_timeout, Duration::from_secs(30));
        assert_eq!(config.artifact_root, PathBuf::from("/var/lib/offers"));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.currency_symbol, "$");
        assert_eq!(config.retry_policy().max_attempts, 5);
    }

    #[test]
    fn persistent_stores_require_database_url() {
        assert_eq!(
            from(&[("USE_PERSISTENT_STORES", "true")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );

        let config = from(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/projectdesk"),
        ])
        .unwrap();
        assert!(config.use_persistent_stores());
    }

    #[test]
    fn database_url_is_ignored_without_persistent_flag() {
        let config = from(&[("DATABASE_URL", "postgres://localhost/projectdesk")]).unwrap();
        assert!(!config.use_persistent_stores());
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            from(&[("OFFER_MAX_ATTEMPTS", "zero")]),
            Err(ConfigError::Invalid { name: "OFFER_MAX_ATTEMPTS", .. })
        ));
        assert!(matches!(
            from(&[("OFFER_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::Invalid { name: "OFFER_MAX_ATTEMPTS", .. })
        ));
        assert!(matches!(
            from(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { name: "LOG_FORMAT", .. })
        ));
        assert!(matches!(
            from(&[("USE_PERSISTENT_STORES", "maybe")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn durations_beyond_a_year_are_rejected() {
        let year_ms = MAX_SCHEDULE_OFFSET.as_millis().to_string();
        let over_ms = (MAX_SCHEDULE_OFFSET.as_millis() + 1).to_string();
        let over_secs = (MAX_SCHEDULE_OFFSET.as_secs() + 1).to_string();

        assert_eq!(from(&[("OFFER_DELAY_MS", year_ms.as_str())]).unwrap().offer.delay(), MAX_SCHEDULE_OFFSET);
        for (name, value) in [
            ("OFFER_DELAY_MS", over_ms.as_str()),
            ("OFFER_DELAY_MS", "18446744073709551615"),
            ("RETRY_BASE_DELAY_MS", over_ms.as_str()),
            ("RETRY_MAX_DELAY_MS", over_ms.as_str()),
            ("JOB_LEASE_TIMEOUT_SECS", over_secs.as_str()),
            ("JOB_LEASE_TIMEOUT_SECS", "18446744073709551615"),
        ] {
            match from(&[(name, value)]) {
                Err(ConfigError::Invalid { name: rejected, .. }) => assert_eq!(rejected, name),
                other => panic!("{name}={value} should be rejected, got {other:?}"),
            }
        }
    }
}
