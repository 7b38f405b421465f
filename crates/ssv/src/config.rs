//! Configuration for the key refresher.
//!
//! [`RefresherConfig`] determines where the provider's key list is fetched
//! from, how often, and how long a single fetch may take. The defaults match
//! the provider's published endpoint and its guidance that keys rotate at most
//! roughly once a day.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SsvError};

/// The provider's published verifier key list.
pub const DEFAULT_KEY_URL: &str = "https://www.gstatic.com/admob/reward/verifier-keys.json";

/// Default interval between key-list refreshes (12 hours).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Default total timeout for one key-list request (10 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for the key-list request (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`KeyRefresher`](crate::KeyRefresher) and
/// [`HttpKeySource`](crate::HttpKeySource).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use reward_ssv::RefresherConfig;
///
/// let config = RefresherConfig::builder()
///     .refresh_interval(Duration::from_secs(6 * 60 * 60))
///     .build()?;
/// assert_eq!(config.key_url(), reward_ssv::DEFAULT_KEY_URL);
/// # Ok::<(), reward_ssv::SsvError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefresherConfig {
    /// URL of the provider's key list.
    #[serde(default = "default_key_url")]
    pub(crate) key_url: String,

    /// Interval between refresh cycles.
    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    pub(crate) refresh_interval: Duration,

    /// Total timeout for one key-list request.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,

    /// Connection timeout for the key-list request.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,
}

fn default_key_url() -> String {
    DEFAULT_KEY_URL.to_owned()
}

fn default_refresh_interval() -> Duration {
    DEFAULT_REFRESH_INTERVAL
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            key_url: default_key_url(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[bon::bon]
impl RefresherConfig {
    /// Creates a new configuration, validating every field.
    ///
    /// # Optional Fields
    ///
    /// * `key_url` - Key list URL (default: [`DEFAULT_KEY_URL`]).
    /// * `refresh_interval` - Interval between refreshes (default: 12 hours).
    /// * `request_timeout` - Total request timeout (default: 10 seconds).
    /// * `connect_timeout` - Connection timeout (default: 5 seconds).
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::Config`] if:
    /// - `key_url` is not an `http` or `https` URL
    /// - any duration is zero
    #[builder]
    pub fn new(
        #[builder(into, default = DEFAULT_KEY_URL.to_owned())] key_url: String,
        #[builder(default = DEFAULT_REFRESH_INTERVAL)] refresh_interval: Duration,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
    ) -> Result<Self> {
        let config = Self { key_url, refresh_interval, request_timeout, connect_timeout };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations bypass the builder; call this after loading one.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.key_url)
            .map_err(|e| SsvError::config(format!("key_url is not a valid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SsvError::config(format!(
                "key_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.refresh_interval.is_zero() {
            return Err(SsvError::config("refresh_interval must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(SsvError::config("request_timeout must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(SsvError::config("connect_timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the key list URL.
    #[must_use]
    pub fn key_url(&self) -> &str {
        &self.key_url
    }

    /// Returns the interval between refresh cycles.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Returns the total request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}
