//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the upstream clients that feed the
//! handlers.

/// Environment-driven configuration.
pub mod config;

/// In-memory publisher with snapshots, capped logs and a live channel.
pub mod fanout;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Repository adapters.
pub mod persistence;

/// Token bucket shared by all REST requests.
pub mod rate_limit;

/// REST client and job scheduler.
pub mod rest;

/// Streaming WebSocket consumer.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
