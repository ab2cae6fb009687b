//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Repository`: idempotent persistence of normalized events and raw REST
//!   payloads
//! - `Publisher`: fan-out of normalized events and price bars to snapshots,
//!   capped logs and live subscribers

mod publisher_port;
mod repository_port;

pub use publisher_port::{PublishError, Publisher, SharedPublisher};
pub use repository_port::{Repository, RepositoryError, RestPayloadRecord, SharedRepository};

#[cfg(test)]
pub use publisher_port::MockPublisher;
#[cfg(test)]
pub use repository_port::MockRepository;
