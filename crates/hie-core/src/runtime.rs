//! Process-level runtime configuration.
//!
//! Resolved once at startup from environment variables and passed into the pipeline by
//! argument. Nothing in request handling reads the environment.

use crate::constants::{
    DEFAULT_BACKOFF_UNIT_MS, DEFAULT_DATA_DIR, DEFAULT_DELIVERY_TIMEOUT_SECS,
    DEFAULT_MAX_CONCURRENT_DELIVERIES, INSTITUTIONS_DIR_NAME, LEDGER_DIR_NAME,
};
use crate::delivery::DeliveryEndpoints;
use crate::{HieError, HieResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_DATA_DIR: &str = "HIE_DATA_DIR";
pub const ENV_TEST_ENDPOINT: &str = "HIE_TEST_ENDPOINT";
pub const ENV_PRODUCTION_ENDPOINT: &str = "HIE_PRODUCTION_ENDPOINT";
pub const ENV_BACKOFF_UNIT_MS: &str = "HIE_BACKOFF_UNIT_MS";
pub const ENV_MAX_CONCURRENT_DELIVERIES: &str = "HIE_MAX_CONCURRENT_DELIVERIES";
pub const ENV_DELIVERY_TIMEOUT_SECS: &str = "HIE_DELIVERY_TIMEOUT_SECS";

/// Runtime configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    data_dir: PathBuf,
    endpoints: DeliveryEndpoints,
    backoff_unit: Duration,
    max_concurrent_deliveries: usize,
    delivery_timeout: Duration,
}

impl RuntimeConfig {
    /// Configuration rooted at `data_dir` with no endpoints and default tuning.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            endpoints: DeliveryEndpoints::default(),
            backoff_unit: Duration::from_millis(DEFAULT_BACKOFF_UNIT_MS),
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            delivery_timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
        }
    }

    /// Builds the configuration from variable lookups, e.g. `|k| std::env::var(k).ok()`.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`HieError::InvalidInput`] if a numeric value does not parse, a count is
    /// zero, or an endpoint is not an absolute http(s) URL.
    pub fn from_env_values(lookup: impl Fn(&str) -> Option<String>) -> HieResult<Self> {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let data_dir = value(ENV_DATA_DIR).unwrap_or_else(|| DEFAULT_DATA_DIR.to_owned());
        let mut config = Self::new(PathBuf::from(data_dir));

        config.endpoints = DeliveryEndpoints {
            test: value(ENV_TEST_ENDPOINT)
                .map(|url| validate_endpoint(ENV_TEST_ENDPOINT, url))
                .transpose()?,
            production: value(ENV_PRODUCTION_ENDPOINT)
                .map(|url| validate_endpoint(ENV_PRODUCTION_ENDPOINT, url))
                .transpose()?,
        };

        if let Some(ms) = parse_positive::<u64>(ENV_BACKOFF_UNIT_MS, value(ENV_BACKOFF_UNIT_MS))? {
            config.backoff_unit = Duration::from_millis(ms);
        }
        if let Some(n) = parse_positive::<usize>(
            ENV_MAX_CONCURRENT_DELIVERIES,
            value(ENV_MAX_CONCURRENT_DELIVERIES),
        )? {
            config.max_concurrent_deliveries = n;
        }
        if let Some(secs) =
            parse_positive::<u64>(ENV_DELIVERY_TIMEOUT_SECS, value(ENV_DELIVERY_TIMEOUT_SECS))?
        {
            config.delivery_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }

    pub fn with_endpoints(mut self, endpoints: DeliveryEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.data_dir.join(LEDGER_DIR_NAME)
    }

    pub fn institutions_dir(&self) -> PathBuf {
        self.data_dir.join(INSTITUTIONS_DIR_NAME)
    }

    pub fn endpoints(&self) -> &DeliveryEndpoints {
        &self.endpoints
    }

    pub fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }

    pub fn max_concurrent_deliveries(&self) -> usize {
        self.max_concurrent_deliveries
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }
}

fn validate_endpoint(key: &str, url: String) -> HieResult<String> {
    match reqwest::Url::parse(&url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(url),
        Ok(parsed) => Err(HieError::InvalidInput(format!(
            "{key} must use http or https, got '{}'",
            parsed.scheme()
        ))),
        Err(e) => Err(HieError::InvalidInput(format!(
            "{key} is not a valid URL: {e}"
        ))),
    }
}

fn parse_positive<T>(key: &str, value: Option<String>) -> HieResult<Option<T>>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = value else {
        return Ok(None);
    };
    match raw.parse::<T>() {
        Ok(n) if n != T::default() => Ok(Some(n)),
        _ => Err(HieError::InvalidInput(format!(
            "{key} must be a positive integer, got '{raw}'"
        ))),
    }
}
