#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Ingest - Options Flow Ingestion Engine
//!
//! Keeps two upstream paths running against the Unusual Whales API and
//! turns both into typed, idempotently persisted events:
//!
//! - a streaming WebSocket subscription, dispatched per channel to handlers
//! - a catalog of REST jobs polled at per-job cadences under a shared token
//!   bucket
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event model, normalization, bar aggregation
//!   - `events`: Normalized event variants and natural keys
//!   - `normalize`: Field aliasing and coercion per feed
//!   - `bars`: One-minute OHLC aggregator
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Repository and publisher interfaces
//!   - `handlers`: Immediate, buffered and price channel handlers
//!   - `jobs`: REST job catalog, request specs, response processors
//!   - `service`: Start/stop orchestration
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `rate_limit`: FIFO token bucket
//!   - `rest`: Bearer-token client with retry and the job scheduler
//!   - `stream`: WebSocket consumer, reconnect backoff, watchdog
//!   - `persistence`, `fanout`: In-memory repository and publisher
//!   - `config`, `health`, `metrics`, `telemetry`: Operational surfaces
//!
//! # Data Flow
//!
//! ```text
//! UW WebSocket ──► StreamConsumer ──► Handlers ─────────┐
//!                                                       ├──► Repository
//! UW REST ──► RestClient ──► Response processors ───────┤
//!               ▲    ▲                                  └──► Publisher
//!     RestScheduler  TokenBucket
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Event model and pure logic with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::bars::{BarAggregator, BarUpdate, PriceBar};
pub use domain::events::{FeedKind, NormalizedEvent};
pub use domain::normalize::{NormalizeError, normalize};

// Application
pub use application::handlers::{
    BufferedHandler, ChannelHandler, FlushPolicy, HandleOutcome, HandlerError, HandlerRegistry,
    ImmediateHandler, PriceHandler, SharedHandler, Subscription, default_handlers,
};
pub use application::jobs::{JobDefinition, RequestSpec, build_catalog};
pub use application::ports::{
    PublishError, Publisher, Repository, RepositoryError, RestPayloadRecord, SharedPublisher,
    SharedRepository,
};
pub use application::service::{BoxedLoop, IngestLoop, IngestionService, ServiceError};

// Infrastructure config
pub use infrastructure::config::{ConfigError, IngestConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Adapters
pub use infrastructure::fanout::{FanoutConfig, FanoutMessage, FanoutPublisher, LogStream};
pub use infrastructure::persistence::InMemoryRepository;
pub use infrastructure::rate_limit::{RateLimitError, TokenBucket};
pub use infrastructure::rest::{RestClient, RestError, RestScheduler, RetryPolicy};
pub use infrastructure::stream::{StreamConfig, StreamConsumer, StreamError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
