//! Client configuration

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::error::{ConfigError, Error, Result};
use crate::protocol::constants::DEFAULT_MAX_LINE_LENGTH;

use super::backoff::BackoffPolicy;

/// Stream client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Absolute address used when `start` is given no URL, and the base
    /// relative URLs are joined to
    pub base_address: Option<Url>,

    /// First reconnect delay; also the lower bound of every delay
    pub reconnect_base_delay: Duration,

    /// Upper bound of the linear backoff term
    pub reconnect_max_delay: Duration,

    /// Random extra delay added on top of the backoff (exclusive bound)
    pub reconnect_jitter: Duration,

    /// Keep and send cookies across requests
    pub with_credentials: bool,

    /// Query parameters appended to every stream URL
    pub query_parameters: BTreeMap<String, String>,

    /// Extra headers sent with every connect request
    pub request_headers: BTreeMap<String, String>,

    /// Start against `base_address` as soon as the client is created
    pub auto_start: bool,

    /// Bound on a single connect attempt (None = unbounded)
    pub connect_timeout: Option<Duration>,

    /// How long `stop` waits for the reconnect loop before aborting it
    pub stop_timeout: Duration,

    /// Longest accepted wire line; longer lines are skipped
    pub max_line_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_address: None,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(10_000),
            reconnect_jitter: Duration::from_millis(500),
            with_credentials: false,
            query_parameters: BTreeMap::new(),
            request_headers: BTreeMap::new(),
            auto_start: false,
            connect_timeout: None,
            stop_timeout: Duration::from_secs(5),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl ClientConfig {
    /// Create a config with a base address
    pub fn new(base_address: &str) -> Result<Self> {
        let base = Url::parse(base_address)
            .map_err(|_| ConfigError::InvalidBaseAddress(base_address.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseAddress(base_address.to_string()).into());
        }

        Ok(Self {
            base_address: Some(base),
            ..Default::default()
        })
    }

    /// Set the base address
    pub fn base_address(mut self, url: Url) -> Self {
        self.base_address = Some(url);
        self
    }

    /// Set the reconnect backoff parameters
    pub fn reconnect(mut self, base: Duration, max: Duration, jitter: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self.reconnect_jitter = jitter;
        self
    }

    /// Enable cookie handling
    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.with_credentials = enabled;
        self
    }

    /// Add a query parameter
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_parameters.insert(name.into(), value.into());
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    /// Start automatically on construction
    pub fn auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = enabled;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the maximum line length
    pub fn max_line_length(mut self, len: usize) -> Self {
        self.max_line_length = len;
        self
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.reconnect_base_delay.is_zero() {
            return Err(ConfigError::NonPositiveBaseDelay);
        }
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(ConfigError::MaxDelayBelowBase);
        }
        if self.stop_timeout.is_zero() {
            return Err(ConfigError::NonPositiveStopTimeout);
        }
        if let Some(base) = &self.base_address {
            if base.cannot_be_a_base() {
                return Err(ConfigError::InvalidBaseAddress(base.to_string()));
            }
        }
        for (name, value) in &self.request_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(ConfigError::InvalidHeader(name.clone()));
            }
        }
        Ok(())
    }

    /// Backoff policy described by this configuration
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.reconnect_base_delay,
            self.reconnect_max_delay,
            self.reconnect_jitter,
        )
    }

    /// Resolve the URL a client should connect to
    ///
    /// An absolute `url` is used as is, a relative one is joined to the base
    /// address, and a missing or blank one falls back to the base address.
    /// Configured query parameters are appended.
    pub fn resolve_url(&self, url: Option<&str>) -> Result<Url> {
        let requested = url.map(str::trim).filter(|u| !u.is_empty());

        let mut resolved = match requested {
            Some(raw) => match Url::parse(raw) {
                Ok(absolute) => absolute,
                Err(url::ParseError::RelativeUrlWithoutBase) => {
                    let base = self.base_address.as_ref().ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "relative URL '{}' given without a base address",
                            raw
                        ))
                    })?;
                    base.join(raw).map_err(|e| {
                        Error::InvalidArgument(format!("cannot resolve '{}': {}", raw, e))
                    })?
                }
                Err(e) => {
                    return Err(Error::InvalidArgument(format!(
                        "invalid URL '{}': {}",
                        raw, e
                    )))
                }
            },
            None => self.base_address.clone().ok_or_else(|| {
                Error::InvalidArgument("no URL given and no base address configured".into())
            })?,
        };

        if !self.query_parameters.is_empty() {
            resolved
                .query_pairs_mut()
                .extend_pairs(self.query_parameters.iter());
        }

        Ok(resolved)
    }
}
