//! Domain Layer - Core market data types and business logic.
//!
//! This layer contains the normalized event model, the normalization
//! parsers and the bar aggregator. Nothing here performs I/O.

/// Normalized event types and their natural identity.
pub mod events;

/// Payload validation and canonicalization.
pub mod normalize;

/// One-minute OHLC bar aggregation.
pub mod bars;
