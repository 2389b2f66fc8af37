use std::thread;
use std::time::Duration;

use reqwest::Url;

use crate::client::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid portal URL '{0}'")]
    InvalidUrl(String),
    #[error("Worker count must be greater than 0")]
    NoWorkers,
    #[error("Max retries must be greater than 0")]
    NoAttempts,
    #[error("Request timeout must be greater than 0")]
    NoTimeout,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub url: String,
    pub user_agent: String,
    /// Per-request timeout; bounds a hung connection.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Institutions scraped at the same time.
    pub workers: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            url: crate::BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            workers: default_workers(),
        }
    }
}

impl HarvestConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if Url::parse(&self.url).is_err() {
            return Err(ConfigError::InvalidUrl(self.url));
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NoTimeout);
        }
        Ok(self)
    }
}

/// One less than the available cores, never below one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HarvestConfig::default().validate().expect("default is valid");
        assert!(config.workers >= 1);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_wait, Duration::from_secs(2));
        assert!(config.url.starts_with("https://www.contraloria.gob.pa/"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_url = HarvestConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad_url.validate(), Err(ConfigError::InvalidUrl(_))));

        let no_workers = HarvestConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(no_workers.validate(), Err(ConfigError::NoWorkers)));

        let mut no_attempts = HarvestConfig::default();
        no_attempts.retry.max_retries = 0;
        assert!(matches!(no_attempts.validate(), Err(ConfigError::NoAttempts)));

        let no_timeout = HarvestConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(no_timeout.validate(), Err(ConfigError::NoTimeout)));
    }
}
