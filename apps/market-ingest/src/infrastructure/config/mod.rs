//! Configuration Module
//!
//! Environment-driven configuration for the ingestion service.

mod settings;

pub use settings::{
    ApiToken, BufferSettings, ConfigError, DEFAULT_TICKERS, EndpointSettings, IngestConfig,
    RateLimitSettings, RestSettings, ServerSettings, StreamSettings, parse_tickers,
};
