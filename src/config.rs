//! Socket configuration, optionally loaded from environment variables.
//!
//! Follows 12-factor style: [`SocketConfig::from_env`] reads settings from
//! the environment (or a `.env` file via `dotenvy`). Programmatic callers
//! start from [`SocketConfig::new`] and adjust with the `with_*` setters.

use std::time::Duration;

use url::Url;

use crate::error::ChannelError;
use crate::socket::PushOptions;

/// Default Phoenix socket endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:4000/socket/websocket";

/// Connection, channel and subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Socket endpoint, without query string.
    pub url: String,

    /// Query parameters appended to the URL (e.g. `token`).
    pub params: Vec<(String, String)>,

    /// Interval between heartbeat frames.
    pub heartbeat_interval: Duration,

    /// Time to wait for each reply before retrying.
    pub push_timeout: Duration,

    /// Additional attempts after the first unanswered push.
    pub push_retries: u32,

    /// Deadline for the transport handshake.
    pub connect_timeout: Duration,

    /// Capacity of each channel's delivery queue.
    pub queue_capacity: usize,

    /// Maximum number of placeholder channels created for unknown topics.
    pub max_inbound_topics: usize,

    /// Timeout of a `doc` push on the control channel.
    pub doc_timeout: Duration,

    /// Timeout of the subscribe handshake.
    pub subscribe_timeout: Duration,

    /// Default window for a subscription to receive its next frame.
    pub subscription_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl SocketConfig {
    /// Creates a configuration for `url` with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let push_timeout = Duration::from_secs(3);
        Self {
            url: url.into(),
            params: Vec::new(),
            heartbeat_interval: Duration::from_secs(30),
            push_timeout,
            push_retries: 3,
            connect_timeout: push_timeout.saturating_mul(2),
            queue_capacity: 32,
            max_inbound_topics: 64,
            doc_timeout: Duration::from_secs(3),
            subscribe_timeout: Duration::from_secs(10),
            subscription_timeout: Duration::from_secs(10),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    /// Missing or unparsable numeric values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] if `PHOENIX_URL` is set but is
    /// not a valid URL, or if `PHOENIX_HEARTBEAT_SECS` is zero.
    pub fn from_env() -> Result<Self, ChannelError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChannelError> {
        let url = lookup("PHOENIX_URL").unwrap_or_else(|| DEFAULT_URL.to_string());
        Url::parse(&url).map_err(|e| ChannelError::InvalidConfig(format!("PHOENIX_URL: {e}")))?;

        let mut config = Self::new(url);
        if let Some(token) = lookup("PHOENIX_TOKEN") {
            config = config.with_param("token", token);
        }

        let parse = |key: &str, default: u64| parse_value(lookup(key), default);
        let timeout_secs = parse("PHOENIX_TIMEOUT_SECS", 3);
        config.push_timeout = Duration::from_secs(timeout_secs);
        config.connect_timeout = Duration::from_secs(timeout_secs.saturating_mul(2));
        config.doc_timeout = Duration::from_secs(timeout_secs);
        config.heartbeat_interval = Duration::from_secs(parse("PHOENIX_HEARTBEAT_SECS", 30));
        config.push_retries = parse_value(lookup("PHOENIX_RETRIES"), 3);
        config.queue_capacity = parse_value(lookup("PHOENIX_QUEUE_CAPACITY"), 32);
        config.max_inbound_topics = parse_value(lookup("PHOENIX_MAX_INBOUND_TOPICS"), 64);
        config = config.with_subscription_timeout(Duration::from_secs(parse(
            "ABSINTHE_SUBSCRIPTION_TIMEOUT_SECS",
            10,
        )));

        if config.heartbeat_interval.is_zero() {
            return Err(ChannelError::InvalidConfig(
                "PHOENIX_HEARTBEAT_SECS must be non-zero".to_string(),
            ));
        }
        Ok(config)
    }

    /// Checks the settings the background loops cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidConfig`] for a zero heartbeat interval.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ChannelError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the per-attempt push timeout and the retry count.
    #[must_use]
    pub fn with_push_policy(mut self, timeout: Duration, retries: u32) -> Self {
        self.push_timeout = timeout;
        self.push_retries = retries;
        self
    }

    /// Sets the handshake deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-channel queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the bound on placeholder channels for unknown topics.
    #[must_use]
    pub fn with_max_inbound_topics(mut self, limit: usize) -> Self {
        self.max_inbound_topics = limit;
        self
    }

    /// Sets the default subscription receive window.
    #[must_use]
    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    /// Returns the default options for pushes on channels of this socket.
    #[must_use]
    pub const fn push_options(&self) -> PushOptions {
        PushOptions::new(self.push_timeout, self.push_retries)
    }

    /// Returns the URL to connect to, with query parameters appended.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] if the base URL cannot be parsed.
    pub fn endpoint(&self) -> Result<Url, ChannelError> {
        let mut url =
            Url::parse(&self.url).map_err(|e| ChannelError::InvalidUrl(format!("{}: {e}", self.url)))?;
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }
        Ok(url)
    }
}

/// Parses a raw setting as `T`, returning `default` on missing or invalid
/// values.
fn parse_value<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
