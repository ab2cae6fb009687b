//! Ingestion Configuration Settings
//!
//! Configuration types for the ingestion service, loaded from environment
//! variables. Malformed optional values fall back to their defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::handlers::FlushPolicy;
use crate::application::jobs::{CadenceTable, default_cadences, parse_cadence_overrides};
use crate::infrastructure::fanout::FanoutConfig;
use crate::infrastructure::rest::RetryPolicy;
use crate::infrastructure::stream::{ReconnectConfig, StreamConfig};

/// Tickers tracked when `INGEST_TICKERS` is unset or empty.
pub const DEFAULT_TICKERS: [&str; 3] = ["SPY", "QQQ", "IWM"];

/// Unusual Whales API token.
#[derive(Clone)]
pub struct ApiToken(String);

impl ApiToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Get the token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken([REDACTED])")
    }
}

/// Upstream endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Streaming WebSocket URL, without the token.
    pub websocket_url: String,
    /// REST API base URL.
    pub rest_base_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            websocket_url: "wss://api.unusualwhales.com/socket".to_string(),
            rest_base_url: "https://api.unusualwhales.com".to_string(),
        }
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// First reconnect delay.
    pub reconnect_min: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
    /// Attempts before the backoff starts over (0 = never).
    pub reconnect_max_attempts: u32,
    /// Jitter fraction applied to reconnect delays.
    pub reconnect_jitter: f64,
    /// Session ends after this long without a data frame (0 = never).
    pub inactivity_timeout: Duration,
    /// Keep-alive ping interval (0 = no pings).
    pub ping_interval: Duration,
    /// Session ends when a ping goes unanswered this long.
    pub ping_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        Self {
            reconnect_min: reconnect.initial_delay,
            reconnect_max: reconnect.max_delay,
            reconnect_max_attempts: reconnect.max_attempts,
            reconnect_jitter: reconnect.jitter_factor,
            inactivity_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(20),
        }
    }
}

/// REST polling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestSettings {
    /// Scheduler tick.
    pub poll_interval: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry and backoff behavior.
    pub retry: RetryPolicy,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

/// Token bucket settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    /// Nominal requests per minute.
    pub per_minute: u32,
    /// Bucket capacity.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl RateLimitSettings {
    /// Capacity equal to the per-minute budget, refilled evenly.
    #[must_use]
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            per_minute,
            capacity: f64::from(per_minute),
            refill_per_sec: f64::from(per_minute) / 60.0,
        }
    }
}

impl RateLimitSettings {
    /// Every request debits one token, so the bucket must hold at least one
    /// and refill at a positive rate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.capacity.is_finite() && self.capacity >= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_CAPACITY".to_string(),
                reason: format!("{} is below one request", self.capacity),
            });
        }
        if !(self.refill_per_sec.is_finite() && self.refill_per_sec > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_REFILL_PER_SEC".to_string(),
                reason: format!("{} is not a positive rate", self.refill_per_sec),
            });
        }
        Ok(())
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::per_minute(120)
    }
}

/// Option trade buffering settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSettings {
    /// Flush when this many trades are held.
    pub max_items: usize,
    /// Flush when a trade arrives this long after the previous flush.
    pub flush_interval: Duration,
}

impl Default for BufferSettings {
    fn default() -> Self {
        let policy = FlushPolicy::default();
        Self {
            max_items: policy.max_items,
            flush_interval: policy.interval,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// API token.
    pub token: ApiToken,
    /// Upstream endpoints.
    pub endpoints: EndpointSettings,
    /// Tracked tickers, upper-cased.
    pub tickers: Vec<String>,
    /// Effective job cadences in seconds.
    pub cadences: CadenceTable,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// REST polling settings.
    pub rest: RestSettings,
    /// Token bucket settings.
    pub rate_limit: RateLimitSettings,
    /// Option trade buffering.
    pub buffer: BufferSettings,
    /// In-memory publisher capacities.
    pub fanout: FanoutConfig,
    /// Server ports.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Load a `.env` file from the working directory or an ancestor into the
    /// process environment. Existing variables win.
    ///
    /// Call before telemetry is initialized so `OTEL_*` and `RUST_LOG`
    /// entries in the file take effect.
    #[must_use]
    pub fn load_dotenv() -> Option<PathBuf> {
        dotenvy::dotenv().ok()
    }

    /// Create configuration from environment variables.
    ///
    /// Malformed optional values are logged and replaced by their defaults,
    /// so install the tracing subscriber first.
    ///
    /// # Errors
    ///
    /// Returns an error if `UW_API_TOKEN` is missing or empty, or a rate
    /// limit value is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `UW_API_TOKEN` is missing or empty, or the rate
    /// limit cannot admit a single request.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader(lookup);

        let token = env
            .raw("UW_API_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("UW_API_TOKEN".to_string()))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(ConfigError::EmptyValue("UW_API_TOKEN".to_string()));
        }

        let default_endpoints = EndpointSettings::default();
        let endpoints = EndpointSettings {
            websocket_url: env
                .non_empty("UW_WEBSOCKET_URL")
                .unwrap_or(default_endpoints.websocket_url),
            rest_base_url: env
                .non_empty("UW_REST_BASE_URL")
                .unwrap_or(default_endpoints.rest_base_url),
        };

        let tickers = env
            .raw("INGEST_TICKERS")
            .map(|raw| parse_tickers(&raw))
            .filter(|tickers| !tickers.is_empty())
            .unwrap_or_else(|| DEFAULT_TICKERS.iter().map(ToString::to_string).collect());

        let cadences = match env.raw("INGEST_JOB_CADENCES") {
            Some(raw) => parse_cadence_overrides(default_cadences(), &raw),
            None => default_cadences(),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            reconnect_min: env.secs("STREAM_RECONNECT_MIN_SECS", defaults.reconnect_min),
            reconnect_max: env.secs("STREAM_RECONNECT_MAX_SECS", defaults.reconnect_max),
            reconnect_max_attempts: env.parse(
                "STREAM_RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect_max_attempts,
            ),
            reconnect_jitter: env
                .parse("STREAM_RECONNECT_JITTER", defaults.reconnect_jitter)
                .clamp(0.0, 1.0),
            inactivity_timeout: env.secs(
                "STREAM_INACTIVITY_TIMEOUT_SECS",
                defaults.inactivity_timeout,
            ),
            ping_interval: env.secs("STREAM_PING_INTERVAL_SECS", defaults.ping_interval),
            ping_timeout: env.secs("STREAM_PING_TIMEOUT_SECS", defaults.ping_timeout),
        };

        let defaults = RestSettings::default();
        let rest = RestSettings {
            poll_interval: env.secs("REST_POLL_INTERVAL_SECS", defaults.poll_interval),
            timeout: env.secs("REST_TIMEOUT_SECS", defaults.timeout),
            retry: RetryPolicy {
                rate_limit_backoff: env.secs(
                    "REST_RATE_LIMIT_BACKOFF_SECS",
                    defaults.retry.rate_limit_backoff,
                ),
                rate_limit_backoff_max: env.secs(
                    "REST_RATE_LIMIT_BACKOFF_MAX_SECS",
                    defaults.retry.rate_limit_backoff_max,
                ),
                rate_limit_max_attempts: env.parse(
                    "REST_RATE_LIMIT_MAX_ATTEMPTS",
                    defaults.retry.rate_limit_max_attempts,
                ),
                server_error_retries: env.parse(
                    "REST_SERVER_ERROR_RETRIES",
                    defaults.retry.server_error_retries,
                ),
                server_error_backoff: env.millis(
                    "REST_SERVER_ERROR_BACKOFF_MS",
                    defaults.retry.server_error_backoff,
                ),
            },
        };

        let per_minute = env.parse("RATE_LIMIT_PER_MINUTE", RateLimitSettings::default().per_minute);
        let derived = RateLimitSettings::per_minute(per_minute);
        let rate_limit = RateLimitSettings {
            per_minute,
            capacity: env.parse("RATE_LIMIT_CAPACITY", derived.capacity),
            refill_per_sec: env.parse("RATE_LIMIT_REFILL_PER_SEC", derived.refill_per_sec),
        };
        rate_limit.validate()?;

        let defaults = BufferSettings::default();
        let buffer = BufferSettings {
            max_items: env.parse("OPTION_TRADE_BUFFER_SIZE", defaults.max_items),
            flush_interval: env.millis("OPTION_TRADE_FLUSH_INTERVAL_MS", defaults.flush_interval),
        };

        let defaults = FanoutConfig::default();
        let fanout = FanoutConfig {
            channel_capacity: env.parse("FANOUT_CHANNEL_CAPACITY", defaults.channel_capacity),
            flow_alert_maxlen: env.parse("FANOUT_FLOW_ALERT_MAXLEN", defaults.flow_alert_maxlen),
            price_tick_maxlen: env.parse("FANOUT_PRICE_TICK_MAXLEN", defaults.price_tick_maxlen),
            price_bar_maxlen: env.parse("FANOUT_PRICE_BAR_MAXLEN", defaults.price_bar_maxlen),
            option_trade_maxlen: env.parse(
                "FANOUT_OPTION_TRADE_MAXLEN",
                defaults.option_trade_maxlen,
            ),
            news_maxlen: env.parse("FANOUT_NEWS_MAXLEN", defaults.news_maxlen),
        };

        let server = ServerSettings {
            health_port: env.parse("INGEST_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            token: ApiToken::new(token.to_string()),
            endpoints,
            tickers,
            cadences,
            stream,
            rest,
            rate_limit,
            buffer,
            fanout,
            server,
        })
    }

    /// Streaming consumer configuration.
    #[must_use]
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.endpoints.websocket_url.clone(),
            token: self.token.expose().to_string(),
            reconnect: ReconnectConfig {
                initial_delay: self.stream.reconnect_min,
                max_delay: self.stream.reconnect_max,
                jitter_factor: self.stream.reconnect_jitter,
                max_attempts: self.stream.reconnect_max_attempts,
            },
            inactivity_timeout: self.stream.inactivity_timeout,
            ping_interval: self.stream.ping_interval,
            ping_timeout: self.stream.ping_timeout,
        }
    }

    /// Option trade flush policy.
    #[must_use]
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::new(self.buffer.max_items, self.buffer.flush_interval)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable parses but cannot be used.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Split a comma list into upper-cased tickers, dropping blanks.
#[must_use]
pub fn parse_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

struct EnvReader<F>(F);

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.non_empty(key) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %value, "Ignoring malformed configuration value");
                default
            }),
            None => default,
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.parse(key, default))
    }
}
