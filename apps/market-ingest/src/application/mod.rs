//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the channel handlers, the REST job catalog and the
//! service orchestrator, along with the port interfaces they use to reach
//! storage and fan-out.

/// Port interfaces for the repository and publisher collaborators.
pub mod ports;

/// Streaming channel handlers and their registry.
pub mod handlers;

/// REST job definitions, request specs and response processors.
pub mod jobs;

/// Service orchestrator wiring the scheduler, consumer and handlers.
pub mod service;
