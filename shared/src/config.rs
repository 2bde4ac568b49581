//! Configuration management for Lambda functions.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::poller::PollPolicy;
use crate::{Error, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Assistant API key
    pub openai_api_key: Option<String>,
    /// Assistant identifier runs are started against
    pub assistant_id: Option<String>,
    /// ARN of a secret holding the assistant credentials
    pub openai_secret_arn: Option<String>,
    /// Assistant API base URL
    pub openai_base_url: String,
    /// Statistics API base URL
    pub abs_base_url: String,
    /// Run polling schedule
    pub poll: PollPolicy,
    /// Path of the static dataflows document
    pub catalog_path: String,
    /// Score cut applied to the catalog, `None` keeps every entry
    pub catalog_top_n: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            assistant_id: None,
            openai_secret_arn: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            abs_base_url: "https://api.data.abs.gov.au".to_string(),
            poll: PollPolicy::default(),
            catalog_path: "abs-dataflows.json".to_string(),
            catalog_top_n: Some(100),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let poll = PollPolicy {
            interval: Duration::from_millis(parse_var(
                "ASSISTANT_POLL_INTERVAL_MS",
                defaults.poll.interval.as_millis() as u64,
            )?),
            max_attempts: parse_var("ASSISTANT_POLL_MAX_ATTEMPTS", defaults.poll.max_attempts)?,
            backoff_factor: parse_var("ASSISTANT_POLL_BACKOFF", defaults.poll.backoff_factor)?,
            max_interval: Duration::from_millis(parse_var(
                "ASSISTANT_POLL_MAX_INTERVAL_MS",
                defaults.poll.max_interval.as_millis() as u64,
            )?),
            jitter: parse_var("ASSISTANT_POLL_JITTER", defaults.poll.jitter)?,
        };
        poll.validate()?;

        let top_n: usize = parse_var("CATALOG_TOP_N", 100)?;

        Ok(Self {
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            assistant_id: non_empty_var("OPENAI_ASSISTANT_ID"),
            openai_secret_arn: non_empty_var("OPENAI_SECRET_ARN"),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            abs_base_url: env::var("ABS_API_BASE").unwrap_or(defaults.abs_base_url),
            poll,
            catalog_path: env::var("CATALOG_PATH").unwrap_or(defaults.catalog_path),
            catalog_top_n: (top_n > 0).then_some(top_n),
        })
    }

    /// True when both assistant secrets are present.
    pub fn has_assistant_credentials(&self) -> bool {
        self.openai_api_key.is_some() && self.assistant_id.is_some()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_baseline_schedule() {
        let config = Config::default();
        assert_eq!(config.poll.interval, Duration::from_secs(1));
        assert_eq!(config.poll.max_attempts, 30);
        assert_eq!(config.catalog_top_n, Some(100));
        assert!(!config.has_assistant_credentials());
    }

    #[test]
    fn test_credentials_need_both_values() {
        let config = Config {
            openai_api_key: Some("sk-test".into()),
            ..Config::default()
        };
        assert!(!config.has_assistant_credentials());

        let config = Config {
            assistant_id: Some("asst_1".into()),
            ..config
        };
        assert!(config.has_assistant_credentials());
    }
}
